//! # Pool Errors
//!
//! Typed failures surfaced by `ConnPool`. Every error is returned to the
//! immediate caller; only close errors hit while discarding a connection are
//! logged instead.

use std::io;

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was closed; build a new one.
    #[error("kvpool: client is closed")]
    Closed,

    /// No admission slot became available within `PoolOptions::pool_timeout`.
    #[error("kvpool: connection pool timeout")]
    Timeout,

    /// The dialer failed to produce a transport.
    #[error("kvpool: dial failed: {0}")]
    Dial(#[source] io::Error),

    /// Closing a transport failed.
    #[error("kvpool: close failed: {0}")]
    Close(#[source] io::Error),
}

impl PoolError {
    /// Returns true when retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Timeout | PoolError::Dial(_))
    }
}
