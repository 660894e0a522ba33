use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::market::Symbol;

type Records = HashMap<String, BTreeSet<Symbol>>;

/// Durable backing for per-user subscription sets.
///
/// The account store proper lives outside this service; this trait is the
/// seam it plugs into. Implementations persist the whole record map at once,
/// which keeps a failed write from leaving a half-updated user behind.
pub trait SubscriptionBackend: Send + Sync {
    fn load(&self) -> Result<Records>;
    fn store(&self, records: &Records) -> Result<()>;
}

/// JSON-file persistence, the durable default for a single-process deploy.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SubscriptionBackend for JsonFileBackend {
    fn load(&self) -> Result<Records> {
        if !self.path.exists() {
            info!("No subscription file at {:?}, starting empty", self.path);
            return Ok(Records::new());
        }

        let raw = fs::read_to_string(&self.path)
            .map_err(|e| Error::StoreUnavailable(format!("read {:?}: {e}", self.path)))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::StoreUnavailable(format!("parse {:?}: {e}", self.path)))
    }

    fn store(&self, records: &Records) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::StoreUnavailable(format!("create {parent:?}: {e}")))?;
        }

        let raw = serde_json::to_string_pretty(records)
            .map_err(|e| Error::StoreUnavailable(format!("serialize records: {e}")))?;
        fs::write(&self.path, raw)
            .map_err(|e| Error::StoreUnavailable(format!("write {:?}: {e}", self.path)))
    }
}

/// Volatile backend for tests and local experiments.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Records>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionBackend for MemoryBackend {
    fn load(&self) -> Result<Records> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn store(&self, records: &Records) -> Result<()> {
        *self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = records.clone();
        Ok(())
    }
}

/// Per-user subscription sets, cached in memory and written through to the
/// backend before any mutation commits.
///
/// One lock serializes all writes: concurrent add/remove for the same user
/// cannot both succeed, and the loser observes the usual membership error.
pub struct SubscriptionStore {
    backend: Box<dyn SubscriptionBackend>,
    cache: Mutex<Records>,
}

impl SubscriptionStore {
    pub fn open(backend: Box<dyn SubscriptionBackend>) -> Result<Self> {
        let cache = backend.load()?;
        if !cache.is_empty() {
            info!("Loaded subscriptions for {} users", cache.len());
        }
        Ok(Self {
            backend,
            cache: Mutex::new(cache),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            cache: Mutex::new(Records::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Never fails for a valid user; a user with no record has an empty set.
    pub fn get(&self, user_id: &str) -> BTreeSet<Symbol> {
        self.lock().get(user_id).cloned().unwrap_or_default()
    }

    pub fn add(&self, user_id: &str, symbol: Symbol) -> Result<BTreeSet<Symbol>> {
        let mut cache = self.lock();

        let current = cache.get(user_id).cloned().unwrap_or_default();
        if current.contains(&symbol) {
            return Err(Error::AlreadySubscribed(symbol));
        }

        let mut updated = current;
        updated.insert(symbol);
        self.commit(&mut cache, user_id, updated.clone())?;
        Ok(updated)
    }

    pub fn remove(&self, user_id: &str, symbol: Symbol) -> Result<BTreeSet<Symbol>> {
        let mut cache = self.lock();

        let current = cache.get(user_id).cloned().unwrap_or_default();
        if !current.contains(&symbol) {
            return Err(Error::NotSubscribed(symbol));
        }

        let mut updated = current;
        updated.remove(&symbol);
        self.commit(&mut cache, user_id, updated.clone())?;
        Ok(updated)
    }

    /// Persists first, commits to the cache only on success, so a backend
    /// failure leaves no partial state.
    fn commit(&self, cache: &mut Records, user_id: &str, updated: BTreeSet<Symbol>) -> Result<()> {
        let mut candidate = cache.clone();
        if updated.is_empty() {
            candidate.remove(user_id);
        } else {
            candidate.insert(user_id.to_string(), updated);
        }

        if let Err(e) = self.backend.store(&candidate) {
            warn!("Subscription write for {user_id} rolled back: {e}");
            return Err(e);
        }

        *cache = candidate;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct FailingBackend;

    impl SubscriptionBackend for FailingBackend {
        fn load(&self) -> Result<Records> {
            Ok(Records::new())
        }

        fn store(&self, _records: &Records) -> Result<()> {
            Err(Error::StoreUnavailable("disk on fire".to_string()))
        }
    }

    #[test]
    fn test_unknown_user_has_empty_set() {
        let store = SubscriptionStore::in_memory();
        assert!(store.get("nobody").is_empty());
    }

    #[test]
    fn test_add_and_remove_round_trip() {
        let store = SubscriptionStore::in_memory();

        let set = store.add("u1", Symbol::GOOG).unwrap();
        assert_eq!(set, BTreeSet::from([Symbol::GOOG]));

        let set = store.add("u1", Symbol::TSLA).unwrap();
        assert_eq!(set, BTreeSet::from([Symbol::GOOG, Symbol::TSLA]));

        let set = store.remove("u1", Symbol::GOOG).unwrap();
        assert_eq!(set, BTreeSet::from([Symbol::TSLA]));
        assert_eq!(store.get("u1"), BTreeSet::from([Symbol::TSLA]));
    }

    #[test]
    fn test_duplicate_subscribe_is_rejected_and_store_unchanged() {
        // Scenario: subscribe(META) twice in a row.
        let store = SubscriptionStore::in_memory();

        store.add("u1", Symbol::META).unwrap();
        let err = store.add("u1", Symbol::META).unwrap_err();

        assert!(matches!(err, Error::AlreadySubscribed(Symbol::META)));
        assert_eq!(store.get("u1"), BTreeSet::from([Symbol::META]));
    }

    #[test]
    fn test_remove_absent_symbol_is_rejected() {
        let store = SubscriptionStore::in_memory();
        let err = store.remove("u1", Symbol::NVDA).unwrap_err();
        assert!(matches!(err, Error::NotSubscribed(Symbol::NVDA)));
    }

    #[test]
    fn test_net_outcome_after_a_mutation_sequence() {
        let store = SubscriptionStore::in_memory();

        store.add("u1", Symbol::GOOG).unwrap();
        store.add("u1", Symbol::TSLA).unwrap();
        store.remove("u1", Symbol::GOOG).unwrap();
        store.add("u1", Symbol::META).unwrap();
        store.add("u1", Symbol::GOOG).unwrap();
        store.remove("u1", Symbol::META).unwrap();

        assert_eq!(store.get("u1"), BTreeSet::from([Symbol::GOOG, Symbol::TSLA]));
    }

    #[test]
    fn test_users_are_independent() {
        let store = SubscriptionStore::in_memory();
        store.add("u1", Symbol::GOOG).unwrap();
        store.add("u2", Symbol::TSLA).unwrap();

        assert_eq!(store.get("u1"), BTreeSet::from([Symbol::GOOG]));
        assert_eq!(store.get("u2"), BTreeSet::from([Symbol::TSLA]));
    }

    #[test]
    fn test_backend_failure_leaves_no_partial_state() {
        let store = SubscriptionStore::open(Box::new(FailingBackend)).unwrap();

        let err = store.add("u1", Symbol::GOOG).unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(store.get("u1").is_empty());
    }

    #[test]
    fn test_json_backend_survives_reopen() {
        let path = std::env::temp_dir().join(format!("subs-{}.json", Uuid::new_v4()));

        {
            let store =
                SubscriptionStore::open(Box::new(JsonFileBackend::new(&path))).unwrap();
            store.add("u1", Symbol::GOOG).unwrap();
            store.add("u1", Symbol::TSLA).unwrap();
        }

        let store = SubscriptionStore::open(Box::new(JsonFileBackend::new(&path))).unwrap();
        assert_eq!(store.get("u1"), BTreeSet::from([Symbol::GOOG, Symbol::TSLA]));

        let _ = fs::remove_file(&path);
    }
}
