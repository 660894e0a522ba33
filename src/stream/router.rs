use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use log::{info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::market::{PriceTick, Symbol};
use crate::stream::ServerEvent;

type Room = HashMap<Uuid, mpsc::Sender<ServerEvent>>;

/// Symbol → sessions inverse index.
///
/// One lock per symbol: the room map is built for the full universe at
/// construction and never resized, so operations on disjoint symbols never
/// serialize against each other and `publish` only ever holds one room lock.
/// Rooms hold session ids plus outbound sender clones, never sessions
/// themselves, so a dead connection can always be evicted from the outside.
pub struct BroadcastRouter {
    rooms: HashMap<Symbol, Mutex<Room>>,
}

impl Default for BroadcastRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastRouter {
    pub fn new() -> Self {
        let rooms = Symbol::universe()
            .map(|symbol| (symbol, Mutex::new(Room::new())))
            .collect();
        Self { rooms }
    }

    fn room(&self, symbol: Symbol) -> std::sync::MutexGuard<'_, Room> {
        self.rooms[&symbol]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a session for every symbol in its working set.
    pub fn register(
        &self,
        id: Uuid,
        outbound: &mpsc::Sender<ServerEvent>,
        symbols: &BTreeSet<Symbol>,
    ) {
        self.update_interest(id, outbound, symbols);
    }

    /// Synchronizes a session's room memberships with its new working set.
    ///
    /// Rooms are reconciled one at a time with insert-or-remove, so the
    /// session is never absent from a room it is staying in.
    pub fn update_interest(
        &self,
        id: Uuid,
        outbound: &mpsc::Sender<ServerEvent>,
        symbols: &BTreeSet<Symbol>,
    ) {
        for symbol in Symbol::universe() {
            let mut room = self.room(symbol);
            if symbols.contains(&symbol) {
                room.insert(id, outbound.clone());
            } else {
                room.remove(&id);
            }
        }
    }

    /// Removes the session from every room it appears in.
    pub fn deregister(&self, id: Uuid) {
        for symbol in Symbol::universe() {
            self.room(symbol).remove(&id);
        }
    }

    /// Delivers a tick to every session in the tick's room, best-effort.
    ///
    /// Delivery is `try_send` only: a session whose queue is full or whose
    /// transport has gone away is skipped and evicted after the room lock is
    /// released, never allowed to block the generator. Returns how many
    /// sessions the tick was queued for.
    pub fn publish(&self, tick: &PriceTick) -> usize {
        let mut delivered = 0;
        let mut dead: Vec<Uuid> = Vec::new();

        {
            let room = self.room(tick.symbol);
            for (id, outbound) in room.iter() {
                match outbound.try_send(ServerEvent::price_tick(tick)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Session {} too slow for {} tick, dropping it", id, tick.symbol);
                        dead.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(*id);
                    }
                }
            }
        }

        for id in dead {
            self.deregister(id);
            info!("Deregistered unreachable session {}", id);
        }

        delivered
    }

    pub fn is_registered(&self, id: Uuid, symbol: Symbol) -> bool {
        self.room(symbol).contains_key(&id)
    }

    pub fn room_size(&self, symbol: Symbol) -> usize {
        self.room(symbol).len()
    }

    /// Total registrations across all rooms, for the stats log line.
    pub fn registration_count(&self) -> usize {
        Symbol::universe().map(|symbol| self.room_size(symbol)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OUTBOUND_QUEUE_SIZE;

    fn subscriber(
        capacity: usize,
    ) -> (Uuid, mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Uuid::new_v4(), tx, rx)
    }

    fn recv_tick(rx: &mut mpsc::Receiver<ServerEvent>) -> Option<(Symbol, f64)> {
        match rx.try_recv() {
            Ok(ServerEvent::PriceTick { symbol, price, .. }) => Some((symbol, price)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_the_ticks_room() {
        let router = BroadcastRouter::new();
        let (goog_id, goog_tx, mut goog_rx) = subscriber(OUTBOUND_QUEUE_SIZE);
        let (tsla_id, tsla_tx, mut tsla_rx) = subscriber(OUTBOUND_QUEUE_SIZE);

        router.register(goog_id, &goog_tx, &BTreeSet::from([Symbol::GOOG]));
        router.register(tsla_id, &tsla_tx, &BTreeSet::from([Symbol::TSLA]));

        let tick = PriceTick::new(Symbol::GOOG, 143.21);
        assert_eq!(router.publish(&tick), 1);

        assert_eq!(recv_tick(&mut goog_rx), Some((Symbol::GOOG, 143.21)));
        assert_eq!(recv_tick(&mut tsla_rx), None);
    }

    #[tokio::test]
    async fn test_update_interest_never_drops_a_retained_room() {
        let router = BroadcastRouter::new();
        let (id, tx, _rx) = subscriber(OUTBOUND_QUEUE_SIZE);

        router.register(id, &tx, &BTreeSet::from([Symbol::GOOG, Symbol::TSLA]));
        router.update_interest(id, &tx, &BTreeSet::from([Symbol::GOOG, Symbol::META]));

        assert!(router.is_registered(id, Symbol::GOOG));
        assert!(router.is_registered(id, Symbol::META));
        assert!(!router.is_registered(id, Symbol::TSLA));
    }

    #[tokio::test]
    async fn test_deregister_leaves_no_entries() {
        let router = BroadcastRouter::new();
        let (id, tx, _rx) = subscriber(OUTBOUND_QUEUE_SIZE);

        let all: BTreeSet<Symbol> = Symbol::universe().collect();
        router.register(id, &tx, &all);
        assert_eq!(router.registration_count(), Symbol::universe_len());

        router.deregister(id);
        assert_eq!(router.registration_count(), 0);
        for symbol in Symbol::universe() {
            assert!(!router.is_registered(id, symbol));
        }
    }

    #[tokio::test]
    async fn test_dead_session_is_skipped_and_evicted() {
        // Scenario: one session's transport fails mid-tick; the other keeps
        // receiving and the failed one leaks no router entries.
        let router = BroadcastRouter::new();
        let (live_id, live_tx, mut live_rx) = subscriber(OUTBOUND_QUEUE_SIZE);
        let (dead_id, dead_tx, dead_rx) = subscriber(OUTBOUND_QUEUE_SIZE);

        let rooms = BTreeSet::from([Symbol::NVDA]);
        router.register(live_id, &live_tx, &rooms);
        router.register(dead_id, &dead_tx, &rooms);
        drop(dead_rx);

        let tick = PriceTick::new(Symbol::NVDA, 500.00);
        assert_eq!(router.publish(&tick), 1);

        assert_eq!(recv_tick(&mut live_rx), Some((Symbol::NVDA, 500.00)));
        assert!(!router.is_registered(dead_id, Symbol::NVDA));
        assert!(router.is_registered(live_id, Symbol::NVDA));
    }

    #[tokio::test]
    async fn test_slow_session_is_dropped_not_waited_on() {
        let router = BroadcastRouter::new();
        let (slow_id, slow_tx, mut slow_rx) = subscriber(1);

        router.register(slow_id, &slow_tx, &BTreeSet::from([Symbol::AMZN]));

        let tick = PriceTick::new(Symbol::AMZN, 150.00);
        assert_eq!(router.publish(&tick), 1);

        // queue is now full; the next publish must skip and evict, not block
        let tick = PriceTick::new(Symbol::AMZN, 150.10);
        assert_eq!(router.publish(&tick), 0);
        assert!(!router.is_registered(slow_id, Symbol::AMZN));

        // the first tick is still there for the slow consumer to drain
        assert_eq!(recv_tick(&mut slow_rx), Some((Symbol::AMZN, 150.00)));
    }
}
