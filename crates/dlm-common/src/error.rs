//! Error types for the lock manager
//!
//! Only cluster-wide failures and programmer errors are represented here.
//! Individual node failures are contained at the node boundary and never
//! surface as a `LockError`.

/// Errors surfaced by the lock manager's public operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot obtain quorum: {connected} nodes connected, {required} required")]
    QuorumUnreachable { connected: usize, required: usize },

    #[error("connect() has not been successfully called")]
    NotConnected,

    #[error("lock manager '{0}' is closed")]
    Closed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LockError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        LockError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
