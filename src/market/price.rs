use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::Symbol;

/// One price observation, emitted once per symbol per generator cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: Symbol, price: f64) -> Self {
        Self {
            symbol,
            price,
            timestamp: Utc::now(),
        }
    }
}

/// Process-wide last-known price per symbol.
///
/// The symbol map itself is built once at startup and never resized; only the
/// per-symbol cells mutate, each behind its own lock, so reads and writes for
/// disjoint symbols never serialize against each other. Written only by the
/// price generator; read by late-joining connections for their snapshot.
pub struct PriceTable {
    cells: HashMap<Symbol, Mutex<f64>>,
}

impl PriceTable {
    /// Builds the table from the static seed prices.
    pub fn with_seed_prices() -> Self {
        let cells = Symbol::universe()
            .map(|symbol| (symbol, Mutex::new(symbol.seed_price())))
            .collect();
        Self { cells }
    }

    fn cell(&self, symbol: Symbol) -> &Mutex<f64> {
        // Every universe symbol is present by construction.
        &self.cells[&symbol]
    }

    pub fn current(&self, symbol: Symbol) -> f64 {
        *self
            .cell(symbol)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn store(&self, symbol: Symbol, price: f64) {
        *self
            .cell(symbol)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = price;
    }

    /// Current price for every universe symbol, for the connect snapshot.
    pub fn snapshot(&self) -> BTreeMap<Symbol, f64> {
        Symbol::universe()
            .map(|symbol| (symbol, self.current(symbol)))
            .collect()
    }
}
