//! # Managed Connection
//!
//! Purpose: Wrap one transport stream with the bookkeeping the pool needs to
//! recycle it: identity, creation time, last-use time, and capacity accounting.
//!
//! ## Design Principles
//! 1. **Exclusive Ownership**: A `Conn` owns its transport; handing it out moves it.
//! 2. **Lock-Free Timestamps**: `used_at` lives in an atomic so writes never
//!    touch the pool mutex.
//! 3. **Consuming Close**: `close(self)` makes double-close unrepresentable.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Remote endpoint of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    /// TCP peer.
    Inet(SocketAddr),
    /// Unix domain socket peer; unnamed sockets have no path.
    Unix(Option<std::path::PathBuf>),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{}", addr),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            PeerAddr::Unix(None) => write!(f, "unix:(unnamed)"),
        }
    }
}

/// Bidirectional byte stream produced by a dialer.
///
/// Implemented for `TcpStream` and, on unix, `UnixStream`. Tests plug in
/// in-memory streams.
pub trait Transport: Read + Write + Send {
    /// Returns the remote endpoint.
    fn peer_addr(&self) -> io::Result<PeerAddr>;

    /// Closes both directions of the stream.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> io::Result<PeerAddr> {
        TcpStream::peer_addr(self).map(PeerAddr::Inet)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Peer already hung up; the socket is released on drop either way.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn peer_addr(&self) -> io::Result<PeerAddr> {
        let addr = std::os::unix::net::UnixStream::peer_addr(self)?;
        Ok(PeerAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf())))
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// A transport plus the metadata the pool tracks for it.
pub struct Conn {
    id: u64,
    transport: Box<dyn Transport>,
    created_at: Instant,
    // Nanoseconds after `created_at`; atomic so idleness can be read through `&self`.
    used_at: AtomicU64,
    pooled: bool,
    checked_out: bool,
}

impl Conn {
    pub(crate) fn new(id: u64, transport: Box<dyn Transport>, pooled: bool) -> Self {
        Conn {
            id,
            transport,
            created_at: Instant::now(),
            used_at: AtomicU64::new(0),
            pooled,
            checked_out: false,
        }
    }

    /// Pool-unique identity of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this connection counts against pool capacity.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub(crate) fn set_pooled(&mut self, pooled: bool) {
        self.pooled = pooled;
    }

    pub(crate) fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    pub(crate) fn set_checked_out(&mut self, checked_out: bool) {
        self.checked_out = checked_out;
    }

    /// Time the transport was wrapped.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time of the last write (creation time if never written).
    pub fn used_at(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.used_at.load(Ordering::Acquire))
    }

    /// Records `tm` as the last use time.
    pub fn set_used_at(&self, tm: Instant) {
        let nanos = tm.saturating_duration_since(self.created_at).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
        self.used_at.store(nanos, Ordering::Release);
    }

    /// Returns true when the connection outlived `max_age` or sat unused for
    /// longer than `idle_timeout`. A zero duration disables that check.
    pub fn is_stale(&self, max_age: Duration, idle_timeout: Duration, now: Instant) -> bool {
        if !max_age.is_zero() && now.saturating_duration_since(self.created_at) >= max_age {
            return true;
        }
        !idle_timeout.is_zero() && now.saturating_duration_since(self.used_at()) >= idle_timeout
    }

    /// Remote endpoint of the underlying transport.
    pub fn remote_addr(&self) -> io::Result<PeerAddr> {
        self.transport.peer_addr()
    }

    /// Closes the transport.
    pub fn close(mut self) -> io::Result<()> {
        self.transport.close()
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.set_used_at(Instant::now());
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.read(buf)
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("pooled", &self.pooled)
            .field("checked_out", &self.checked_out)
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}
