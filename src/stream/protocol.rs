use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::{PriceTick, Symbol};

/// Commands a client may send while its session is active.
///
/// The symbol arrives as a raw string so an out-of-universe ticker surfaces
/// as an inline `error` event instead of a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribed,
    Unsubscribed,
}

/// Everything the server pushes down a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full state pushed on entering the active state: current prices for the
    /// whole universe plus the user's persisted subscription set.
    Snapshot {
        prices: BTreeMap<Symbol, f64>,
        subscriptions: BTreeSet<Symbol>,
    },
    /// Acknowledgement of a subscribe/unsubscribe from either surface,
    /// carrying the full updated set so clients can resynchronize.
    SubscriptionChanged {
        subscriptions: BTreeSet<Symbol>,
        action: SubscriptionAction,
        symbol: Symbol,
    },
    PriceTick {
        symbol: Symbol,
        price: f64,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn price_tick(tick: &PriceTick) -> Self {
        ServerEvent::PriceTick {
            symbol: tick.symbol,
            price: tick.price,
            timestamp: tick.timestamp,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_parse_from_wire_form() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"action":"subscribe","symbol":"META"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Subscribe { ref symbol } if symbol == "META"));

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"action":"unsubscribe","symbol":"XYZ"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Unsubscribe { ref symbol } if symbol == "XYZ"));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<ClientCommand>(r#"{"action":"resub","symbol":"META"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let mut prices = BTreeMap::new();
        prices.insert(Symbol::GOOG, 142.5);
        let mut subscriptions = BTreeSet::new();
        subscriptions.insert(Symbol::GOOG);

        let json = ServerEvent::Snapshot {
            prices,
            subscriptions,
        }
        .to_json()
        .unwrap();

        assert!(json.contains(r#""type":"snapshot""#));
        assert!(json.contains(r#""GOOG":142.5"#));
        assert!(json.contains(r#""subscriptions":["GOOG"]"#));
    }

    #[test]
    fn test_subscription_changed_carries_full_set_and_delta() {
        let mut subscriptions = BTreeSet::new();
        subscriptions.insert(Symbol::GOOG);
        subscriptions.insert(Symbol::META);

        let json = ServerEvent::SubscriptionChanged {
            subscriptions,
            action: SubscriptionAction::Subscribed,
            symbol: Symbol::META,
        }
        .to_json()
        .unwrap();

        assert!(json.contains(r#""type":"subscription_changed""#));
        assert!(json.contains(r#""action":"subscribed""#));
        assert!(json.contains(r#""symbol":"META""#));
        assert!(json.contains(r#""subscriptions":["GOOG","META"]"#));
    }

    #[test]
    fn test_price_tick_round_trips() {
        let tick = PriceTick::new(Symbol::NVDA, 496.12);
        let json = ServerEvent::price_tick(&tick).to_json().unwrap();

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        match back {
            ServerEvent::PriceTick { symbol, price, .. } => {
                assert_eq!(symbol, Symbol::NVDA);
                assert_eq!(price, 496.12);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
