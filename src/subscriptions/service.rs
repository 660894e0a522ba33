use std::collections::BTreeSet;
use std::sync::Arc;

use log::info;

use crate::error::Result;
use crate::market::Symbol;
use crate::stream::{BroadcastRouter, ServerEvent, SessionRegistry, SubscriptionAction};
use crate::subscriptions::SubscriptionStore;

/// The single choke point for subscription mutations.
///
/// Both the push channel and the REST surface route through here, so a
/// successful store write always reaches every live session of the user:
/// working copies are replaced, router rooms re-registered, and a
/// `subscription_changed` event carrying the full set is pushed to each
/// connection (that event is the acknowledgement the initiating side sees).
pub struct SubscriptionService {
    store: Arc<SubscriptionStore>,
    registry: Arc<SessionRegistry>,
    router: Arc<BroadcastRouter>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<SubscriptionStore>,
        registry: Arc<SessionRegistry>,
        router: Arc<BroadcastRouter>,
    ) -> Self {
        Self {
            store,
            registry,
            router,
        }
    }

    pub fn current(&self, user_id: &str) -> BTreeSet<Symbol> {
        self.store.get(user_id)
    }

    pub fn subscribe(&self, user_id: &str, symbol: Symbol) -> Result<BTreeSet<Symbol>> {
        let updated = self.store.add(user_id, symbol)?;
        info!("{user_id} subscribed to {symbol}");
        self.fan_out(user_id, &updated, SubscriptionAction::Subscribed, symbol);
        Ok(updated)
    }

    pub fn unsubscribe(&self, user_id: &str, symbol: Symbol) -> Result<BTreeSet<Symbol>> {
        let updated = self.store.remove(user_id, symbol)?;
        info!("{user_id} unsubscribed from {symbol}");
        self.fan_out(user_id, &updated, SubscriptionAction::Unsubscribed, symbol);
        Ok(updated)
    }

    /// Applies a committed store change to every live session of the user.
    fn fan_out(
        &self,
        user_id: &str,
        updated: &BTreeSet<Symbol>,
        action: SubscriptionAction,
        symbol: Symbol,
    ) {
        for handle in self.registry.for_user(user_id) {
            handle.set_symbols(updated.clone());
            self.router
                .update_interest(handle.id, &handle.outbound, updated);
            handle.push(ServerEvent::SubscriptionChanged {
                subscriptions: updated.clone(),
                action,
                symbol,
            });
        }
    }
}
