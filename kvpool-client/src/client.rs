//! # Pooled Command Client
//!
//! Purpose: Send wire-protocol commands over pooled connections.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling and framing details.
//! 2. **Check Out, Check In**: Every call borrows one connection and returns it
//!    before completing; no per-request state survives the call.
//! 3. **Never Recycle a Broken Stream**: A connection whose write failed is
//!    discarded, since the server may hold a half-read command.

use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;

use kvpool::{Conn, ConnPool, PoolError, PoolStats, Pooler};

use crate::options::ClientOptions;
use crate::resp::encode_command_line;

/// Result type for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection could be checked out.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Writing the command failed; the connection was discarded.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The command string contained no arguments.
    #[error("empty command")]
    EmptyCommand,
}

/// Client sending commands through a connection pool. Clones share the pool.
#[derive(Clone)]
pub struct Client {
    opt: ClientOptions,
    pool: Arc<dyn Pooler>,
}

impl Client {
    /// Applies option defaults and builds the pool.
    pub fn new(mut opt: ClientOptions) -> Self {
        opt.init();
        let pool = ConnPool::new(opt.pool_options());
        Client {
            opt,
            pool: Arc::new(pool),
        }
    }

    /// Builds a client over an existing pool.
    pub fn with_pool(mut opt: ClientOptions, pool: Arc<dyn Pooler>) -> Self {
        opt.init();
        Client { opt, pool }
    }

    /// Options after defaulting.
    pub fn options(&self) -> &ClientOptions {
        &self.opt
    }

    pub fn pool(&self) -> &dyn Pooler {
        self.pool.as_ref()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Encodes `cmd` and writes it on a pooled connection.
    ///
    /// The connection goes back to the pool on success and is removed on a
    /// write error.
    pub fn send_command(&self, cmd: &str) -> ClientResult<()> {
        let buf = encode_command_line(cmd).ok_or(ClientError::EmptyCommand)?;

        let mut conn = self.get_conn()?;
        tracing::trace!(
            conn = conn.id(),
            command = %String::from_utf8_lossy(&buf).escape_debug(),
            "sending command"
        );

        match write_command(&mut conn, &buf) {
            Ok(()) => {
                self.release_conn(conn);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(conn = conn.id(), error = %err, "write failed, discarding connection");
                self.pool.remove(conn);
                Err(ClientError::Io(err))
            }
        }
    }

    /// Closes the underlying pool.
    pub fn close(&self) -> ClientResult<()> {
        self.pool.close()?;
        Ok(())
    }

    fn get_conn(&self) -> ClientResult<Conn> {
        self.pool.get().map_err(|err| {
            tracing::warn!(error = %err, "failed to check out a connection");
            ClientError::Pool(err)
        })
    }

    fn release_conn(&self, conn: Conn) {
        self.pool.put(conn);
    }
}

fn write_command(conn: &mut Conn, buf: &[u8]) -> io::Result<()> {
    conn.write_all(buf)?;
    conn.flush()
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.opt)
            .field("conns", &self.pool.len())
            .field("idle_conns", &self.pool.idle_len())
            .finish()
    }
}
