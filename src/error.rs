use thiserror::Error;

use crate::market::Symbol;

/// Failure taxonomy for the streaming service.
///
/// `AuthenticationFailed` is fatal to its connection; the symbol-level
/// variants are recoverable and reported inline while the connection stays
/// open; `StoreUnavailable` leaves no partial state behind.
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("already subscribed to {0}")]
    AlreadySubscribed(Symbol),

    #[error("not subscribed to {0}")]
    NotSubscribed(Symbol),

    #[error("subscription store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

impl Error {
    /// True for errors a connection reports inline and survives.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownSymbol(_)
                | Error::AlreadySubscribed(_)
                | Error::NotSubscribed(_)
                | Error::StoreUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
