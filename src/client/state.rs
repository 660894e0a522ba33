use std::collections::{BTreeSet, HashMap};

use log::warn;

use crate::client::{PriceHistory, PricePoint};
use crate::config::HISTORY_CAPACITY;
use crate::market::Symbol;
use crate::stream::ServerEvent;

/// Local mirror of the server-pushed state.
///
/// Events are applied exactly as they arrive, with no ordering assumed
/// between event kinds. The server's `subscription_changed` set always
/// replaces the local one wholesale; a locally initiated subscribe only
/// marks the symbol in-flight so its control can be disabled, never mutates
/// the set itself. On disconnect everything is kept (stale-but-visible
/// beats a blank screen); the next connect clears and reseeds from the
/// fresh snapshot.
pub struct ClientState {
    capacity: usize,
    connected: bool,
    prices: HashMap<Symbol, f64>,
    history: HashMap<Symbol, PriceHistory>,
    subscriptions: BTreeSet<Symbol>,
    in_flight: BTreeSet<Symbol>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl ClientState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            connected: false,
            prices: HashMap::new(),
            history: HashMap::new(),
            subscriptions: BTreeSet::new(),
            in_flight: BTreeSet::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn price(&self, symbol: Symbol) -> Option<f64> {
        self.prices.get(&symbol).copied()
    }

    pub fn history(&self, symbol: Symbol) -> Option<&PriceHistory> {
        self.history.get(&symbol)
    }

    pub fn subscriptions(&self) -> &BTreeSet<Symbol> {
        &self.subscriptions
    }

    /// True while a subscribe/unsubscribe for the symbol awaits its
    /// acknowledgement; callers disable that symbol's control meanwhile.
    pub fn is_in_flight(&self, symbol: Symbol) -> bool {
        self.in_flight.contains(&symbol)
    }

    pub fn mark_in_flight(&mut self, symbol: Symbol) {
        self.in_flight.insert(symbol);
    }

    /// Transport is up again: drop everything and wait for the snapshot.
    pub fn on_connected(&mut self) {
        self.prices.clear();
        self.history.clear();
        self.subscriptions.clear();
        self.in_flight.clear();
        self.connected = true;
    }

    /// Transport lost: keep showing the last known state.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Snapshot {
                prices,
                subscriptions,
            } => {
                self.prices.clear();
                self.history.clear();
                for (symbol, price) in prices {
                    self.prices.insert(symbol, price);
                    self.history.insert(
                        symbol,
                        PriceHistory::seeded(
                            self.capacity,
                            PricePoint {
                                time: chrono::Utc::now(),
                                price,
                            },
                        ),
                    );
                }
                self.subscriptions = subscriptions;
            }
            ServerEvent::SubscriptionChanged {
                subscriptions,
                symbol,
                ..
            } => {
                // authoritative value, replaces rather than merges
                self.subscriptions = subscriptions;
                self.in_flight.remove(&symbol);
            }
            ServerEvent::PriceTick {
                symbol,
                price,
                timestamp,
            } => {
                self.prices.insert(symbol, price);
                self.history
                    .entry(symbol)
                    .or_insert_with(|| PriceHistory::new(self.capacity))
                    .push(PricePoint {
                        time: timestamp,
                        price,
                    });
            }
            ServerEvent::Error { message } => {
                warn!("Server error: {message}");
                // the pending request this answers cannot be identified, so
                // re-enable every control rather than wedge one forever
                self.in_flight.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceTick;
    use std::collections::BTreeMap;

    fn snapshot() -> ServerEvent {
        let prices: BTreeMap<Symbol, f64> = Symbol::universe()
            .map(|symbol| (symbol, symbol.seed_price()))
            .collect();
        ServerEvent::Snapshot {
            prices,
            subscriptions: BTreeSet::from([Symbol::GOOG, Symbol::TSLA]),
        }
    }

    fn tick(symbol: Symbol, price: f64) -> ServerEvent {
        ServerEvent::price_tick(&PriceTick::new(symbol, price))
    }

    #[test]
    fn test_snapshot_seeds_prices_history_and_subscriptions() {
        let mut state = ClientState::new(20);
        state.on_connected();
        state.apply(snapshot());

        assert_eq!(state.price(Symbol::GOOG), Some(Symbol::GOOG.seed_price()));
        assert_eq!(state.history(Symbol::GOOG).unwrap().len(), 1);
        assert_eq!(
            state.subscriptions(),
            &BTreeSet::from([Symbol::GOOG, Symbol::TSLA])
        );
    }

    #[test]
    fn test_snapshot_then_ticks_round_trip() {
        let mut state = ClientState::new(20);
        state.on_connected();
        state.apply(snapshot());

        let prices = [143.0, 143.5, 142.9];
        for price in prices {
            state.apply(tick(Symbol::GOOG, price));
        }

        // current price is the last tick, history is seed + ticks in order
        assert_eq!(state.price(Symbol::GOOG), Some(142.9));
        let observed: Vec<f64> = state
            .history(Symbol::GOOG)
            .unwrap()
            .iter()
            .map(|p| p.price)
            .collect();
        assert_eq!(observed, vec![Symbol::GOOG.seed_price(), 143.0, 143.5, 142.9]);
    }

    #[test]
    fn test_history_never_exceeds_capacity() {
        let capacity = 20;
        let mut state = ClientState::new(capacity);
        state.on_connected();
        state.apply(snapshot());

        for i in 0..capacity * 2 {
            state.apply(tick(Symbol::TSLA, 239.0 + i as f64));
        }

        let history = state.history(Symbol::TSLA).unwrap();
        assert_eq!(history.len(), capacity);
        // the newest entries won; the seed is long gone
        assert_eq!(history.latest().unwrap().price, 239.0 + (capacity * 2 - 1) as f64);
    }

    #[test]
    fn test_subscription_set_is_replaced_wholesale() {
        let mut state = ClientState::new(20);
        state.on_connected();
        state.apply(snapshot());
        state.mark_in_flight(Symbol::META);

        state.apply(ServerEvent::SubscriptionChanged {
            subscriptions: BTreeSet::from([Symbol::META]),
            action: crate::stream::SubscriptionAction::Subscribed,
            symbol: Symbol::META,
        });

        // not merged with {GOOG, TSLA}
        assert_eq!(state.subscriptions(), &BTreeSet::from([Symbol::META]));
        assert!(!state.is_in_flight(Symbol::META));
    }

    #[test]
    fn test_disconnect_keeps_state_reconnect_clears_it() {
        // Scenario: offline keeps stale-but-visible data; the new connect
        // cycle replaces it without merging.
        let mut state = ClientState::new(20);
        state.on_connected();
        state.apply(snapshot());
        state.apply(tick(Symbol::GOOG, 150.0));

        state.on_disconnected();
        assert!(!state.is_connected());
        assert_eq!(state.price(Symbol::GOOG), Some(150.0));
        assert_eq!(state.history(Symbol::GOOG).unwrap().len(), 2);

        state.on_connected();
        assert!(state.price(Symbol::GOOG).is_none());
        assert!(state.subscriptions().is_empty());

        state.apply(snapshot());
        assert_eq!(state.price(Symbol::GOOG), Some(Symbol::GOOG.seed_price()));
        assert_eq!(state.history(Symbol::GOOG).unwrap().len(), 1);
    }

    #[test]
    fn test_error_event_releases_in_flight_controls() {
        let mut state = ClientState::new(20);
        state.on_connected();
        state.mark_in_flight(Symbol::NVDA);

        state.apply(ServerEvent::error("unknown symbol: AAPL"));
        assert!(!state.is_in_flight(Symbol::NVDA));
    }

    #[test]
    fn test_tick_without_snapshot_still_lands() {
        // no ordering guarantee between event kinds
        let mut state = ClientState::new(20);
        state.on_connected();
        state.apply(tick(Symbol::AMZN, 151.0));

        assert_eq!(state.price(Symbol::AMZN), Some(151.0));
        assert_eq!(state.history(Symbol::AMZN).unwrap().len(), 1);
    }
}
