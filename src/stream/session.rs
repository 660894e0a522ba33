use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{Error, Result};
use crate::market::Symbol;
use crate::stream::{BroadcastRouter, ServerEvent};

/// Connection lifecycle. A connection that reaches `Active` must pass back
/// through `Closed` exactly once, and closing always deregisters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

/// Per-connection state, created at handshake and destroyed on close.
///
/// The working symbol set is shared (`Arc`) with the session's registry
/// handle so subscription changes landing from another surface (REST, a
/// second tab) update this connection too.
pub struct Session {
    id: Uuid,
    peer_addr: String,
    state: SessionState,
    user: Option<AuthenticatedUser>,
    symbols: Arc<Mutex<BTreeSet<Symbol>>>,
}

impl Session {
    pub fn connecting(peer_addr: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr: peer_addr.into(),
            state: SessionState::Connecting,
            user: None,
            symbols: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user.as_ref()
    }

    /// Snapshot of the working subscription set.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.symbols
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn advance(&mut self, to: SessionState) -> Result<()> {
        let allowed = matches!(
            (self.state, to),
            (SessionState::Connecting, SessionState::Authenticating)
                | (SessionState::Authenticating, SessionState::Active)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Authenticating, SessionState::Closed)
                | (SessionState::Active, SessionState::Closed)
        );

        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }

        self.state = to;
        Ok(())
    }

    /// Handshake received; the token is about to be verified.
    pub fn begin_authentication(&mut self) -> Result<()> {
        self.advance(SessionState::Authenticating)
    }

    /// Token verified: attach the identity and the persisted subscription set
    /// as this connection's working copy.
    pub fn activate(&mut self, user: AuthenticatedUser, symbols: BTreeSet<Symbol>) -> Result<()> {
        self.advance(SessionState::Active)?;
        *self
            .symbols
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = symbols;
        self.user = Some(user);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.advance(SessionState::Closed)
    }

    /// Registry view of this session. Valid only once active.
    pub fn handle(&self, outbound: mpsc::Sender<ServerEvent>) -> Result<SessionHandle> {
        let user = self.user.as_ref().ok_or(Error::InvalidTransition {
            from: self.state.as_str(),
            to: SessionState::Active.as_str(),
        })?;

        Ok(SessionHandle {
            id: self.id,
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            symbols: Arc::clone(&self.symbols),
            outbound,
            connected_at: Instant::now(),
        })
    }
}

/// Back-reference to a live session, held by the registry and cloned into
/// the router. Owns nothing: dropping a handle never tears down the
/// connection, and the outbound sender closing is how staleness shows.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub email: String,
    symbols: Arc<Mutex<BTreeSet<Symbol>>>,
    pub outbound: mpsc::Sender<ServerEvent>,
    pub connected_at: Instant,
}

impl SessionHandle {
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.symbols
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_symbols(&self, symbols: BTreeSet<Symbol>) {
        *self
            .symbols
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = symbols;
    }

    /// Queues an event without blocking; a full queue is the write task's
    /// problem, a closed one means the connection is already gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full for session {}", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// All currently live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.lock().insert(handle.id, handle);
    }

    pub fn remove(&self, id: Uuid) -> Option<SessionHandle> {
        self.lock().remove(&id)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Every live session authenticated as the given user (one per tab).
    pub fn for_user(&self, user_id: &str) -> Vec<SessionHandle> {
        self.lock()
            .values()
            .filter(|handle| handle.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Leak backstop: reaps sessions whose outbound channel has closed
    /// without the connection task deregistering them.
    pub fn sweep_closed(&self, router: &BroadcastRouter) -> usize {
        let stale: Vec<Uuid> = self
            .lock()
            .values()
            .filter(|handle| handle.is_closed())
            .map(|handle| handle.id)
            .collect();

        for id in &stale {
            self.lock().remove(id);
            router.deregister(*id);
            info!("Swept closed session {}", id);
        }

        stale.len()
    }
}
