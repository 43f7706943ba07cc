//! # Client Options
//!
//! Configuration for [`Client`](crate::Client) and the pool it builds.
//! Zero-valued fields are filled by [`ClientOptions::init`]; the options can
//! also be deserialized (durations in milliseconds, dialer omitted).

use std::fmt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use kvpool::{Dialer, PoolOptions};

pub const DEFAULT_ADDR: &str = "localhost:6379";
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POOL_SIZE: usize = 20;
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport used by the synthesized dialer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    /// `addr` is a filesystem path.
    Unix,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub network: Network,
    /// `host:port` for TCP, socket path for unix.
    pub addr: String,
    /// Custom dialer; when set, `network`, `addr` and `dial_timeout` are ignored.
    #[serde(skip)]
    pub dialer: Option<Dialer>,
    #[serde(with = "duration_ms")]
    pub dial_timeout: Duration,
    /// How long a command waits for a free connection.
    #[serde(with = "duration_ms")]
    pub pool_timeout: Duration,
    pub pool_size: usize,
    pub min_idle_conns: usize,
    #[serde(with = "duration_ms")]
    pub max_conn_age: Duration,
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Reserved for dial retries; currently not acted on.
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub min_retry_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_retry_backoff: Duration,
}

impl ClientOptions {
    /// Options pointing at `addr`, everything else left for `init`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientOptions {
            addr: addr.into(),
            ..ClientOptions::default()
        }
    }

    /// Fills zero-valued fields with defaults. Has no other side effects.
    pub fn init(&mut self) {
        if self.addr.is_empty() {
            self.addr = DEFAULT_ADDR.to_string();
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if self.pool_size == 0 {
            self.pool_size = DEFAULT_POOL_SIZE;
        }
        if self.pool_timeout.is_zero() {
            self.pool_timeout = DEFAULT_POOL_TIMEOUT;
        }
        if self.dialer.is_none() {
            self.dialer = Some(network_dialer(self.network, self.addr.clone(), self.dial_timeout));
        }
    }

    /// Pool options derived from these client options.
    pub fn pool_options(&self) -> PoolOptions {
        let dialer = match &self.dialer {
            Some(dialer) => dialer.clone(),
            None => network_dialer(self.network, self.addr.clone(), self.dial_timeout),
        };
        PoolOptions::new(dialer)
            .pool_size(self.pool_size)
            .min_idle_conns(self.min_idle_conns)
            .max_conn_age(self.max_conn_age)
            .idle_timeout(self.idle_timeout)
            .pool_timeout(self.pool_timeout)
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("network", &self.network)
            .field("addr", &self.addr)
            .field("custom_dialer", &self.dialer.is_some())
            .field("dial_timeout", &self.dial_timeout)
            .field("pool_timeout", &self.pool_timeout)
            .field("pool_size", &self.pool_size)
            .field("min_idle_conns", &self.min_idle_conns)
            .field("max_conn_age", &self.max_conn_age)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Dialer connecting to `addr` over `network`.
pub fn network_dialer(network: Network, addr: String, timeout: Duration) -> Dialer {
    match network {
        Network::Tcp => kvpool::dialer(move || dial_tcp(&addr, timeout)),
        #[cfg(unix)]
        Network::Unix => kvpool::dialer(move || std::os::unix::net::UnixStream::connect(&addr)),
        #[cfg(not(unix))]
        Network::Unix => kvpool::dialer(|| -> io::Result<TcpStream> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            ))
        }),
    }
}

fn dial_tcp(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(stream) => {
                // Commands are small; do not let Nagle hold them back.
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{} resolved to no addresses", addr))
    }))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
