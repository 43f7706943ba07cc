//! # kvpool
//!
//! Purpose: Client-side connection pool for a TCP key-value server. Bounds how
//! many connections are checked out at once, reuses idle ones, keeps a minimum
//! number warm, and gives up on acquisition after a timeout.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse sockets instead of reconnecting per call.
//! 2. **Bounded Admission**: A bounded channel caps checked-out connections.
//! 3. **Transport Agnostic**: Anything implementing `Transport` can be pooled.
//! 4. **Typed Failures**: Every failure surfaces as a `PoolError`.

mod admission;
mod conn;
mod error;
mod options;
mod pool;
mod stats;

pub use conn::{Conn, PeerAddr, Transport};
pub use error::{PoolError, PoolResult};
pub use options::{dialer, Dialer, PoolOptions};
pub use pool::{ConnPool, Pooler};
pub use stats::PoolStats;
