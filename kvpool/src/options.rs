//! Pool configuration.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::conn::Transport;

/// Factory producing a fresh transport. Addressing and timeouts are captured
/// by the closure.
pub type Dialer = Arc<dyn Fn() -> io::Result<Box<dyn Transport>> + Send + Sync>;

/// Wraps a closure into a [`Dialer`].
pub fn dialer<F, T>(f: F) -> Dialer
where
    F: Fn() -> io::Result<T> + Send + Sync + 'static,
    T: Transport + 'static,
{
    Arc::new(move || f().map(|t| Box::new(t) as Box<dyn Transport>))
}

/// Options consumed by [`ConnPool`](crate::ConnPool). Read-only once the pool
/// is built.
#[derive(Clone)]
pub struct PoolOptions {
    /// Opens a connection to the server.
    pub dialer: Dialer,
    /// Maximum number of pooled connections checked out at once.
    pub pool_size: usize,
    /// Idle connections kept warm.
    pub min_idle_conns: usize,
    /// Connections older than this are discarded on checkout. Zero disables.
    pub max_conn_age: Duration,
    /// How long `get` waits for a free slot.
    pub pool_timeout: Duration,
    /// Connections unused for this long are discarded on checkout. Zero disables.
    pub idle_timeout: Duration,
}

impl PoolOptions {
    /// Options with `pool_size` 10 and everything else disabled.
    pub fn new(dialer: Dialer) -> Self {
        PoolOptions {
            dialer,
            pool_size: 10,
            min_idle_conns: 0,
            max_conn_age: Duration::ZERO,
            pool_timeout: Duration::from_secs(5),
            idle_timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    #[must_use]
    pub fn min_idle_conns(mut self, count: usize) -> Self {
        self.min_idle_conns = count;
        self
    }

    #[must_use]
    pub fn max_conn_age(mut self, age: Duration) -> Self {
        self.max_conn_age = age;
        self
    }

    #[must_use]
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("pool_size", &self.pool_size)
            .field("min_idle_conns", &self.min_idle_conns)
            .field("max_conn_age", &self.max_conn_age)
            .field("pool_timeout", &self.pool_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}
