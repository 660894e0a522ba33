use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::Error;

/// The supported ticker universe, fixed at process start.
///
/// Everything outside this enum is rejected at the string boundary with
/// [`Error::UnknownSymbol`]; internal code only ever handles typed symbols.
#[allow(missing_docs)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Symbol {
    GOOG,
    TSLA,
    AMZN,
    META,
    NVDA,
}

impl Symbol {
    /// Iterates the whole universe in a stable order.
    pub fn universe() -> impl Iterator<Item = Symbol> {
        Symbol::iter()
    }

    pub fn universe_len() -> usize {
        Symbol::iter().count()
    }

    /// Parses a client-supplied ticker string.
    pub fn parse(raw: &str) -> Result<Symbol, Error> {
        raw.trim()
            .parse::<Symbol>()
            .map_err(|_| Error::UnknownSymbol(raw.trim().to_string()))
    }

    /// Simulated opening price, seeded once at process start.
    pub fn seed_price(self) -> f64 {
        match self {
            Symbol::GOOG => 142.50,
            Symbol::TSLA => 238.75,
            Symbol::AMZN => 151.30,
            Symbol::META => 352.20,
            Symbol::NVDA => 495.80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_is_fixed() {
        assert_eq!(Symbol::universe_len(), 5);
        let all: Vec<Symbol> = Symbol::universe().collect();
        assert!(all.contains(&Symbol::GOOG));
        assert!(all.contains(&Symbol::NVDA));
    }

    #[test]
    fn test_parse_accepts_known_tickers() {
        assert_eq!(Symbol::parse("META").unwrap(), Symbol::META);
        assert_eq!(Symbol::parse("tsla").unwrap(), Symbol::TSLA);
        assert_eq!(Symbol::parse(" GOOG ").unwrap(), Symbol::GOOG);
    }

    #[test]
    fn test_parse_rejects_unknown_tickers() {
        let err = Symbol::parse("AAPL").unwrap_err();
        assert!(matches!(err, Error::UnknownSymbol(ref s) if s == "AAPL"));
    }

    #[test]
    fn test_seed_prices_are_positive() {
        for symbol in Symbol::universe() {
            assert!(symbol.seed_price() > 0.0, "{symbol} has no seed price");
        }
    }

    #[test]
    fn test_symbol_serializes_as_plain_string() {
        let json = serde_json::to_string(&Symbol::GOOG).unwrap();
        assert_eq!(json, "\"GOOG\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Symbol::GOOG);
    }
}
