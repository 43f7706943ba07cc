//! # Connection Pool
//!
//! Purpose: Hand out reusable server connections to many threads while never
//! letting more than `pool_size` pooled connections be checked out at once.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Idle connections sit on a LIFO stack so the most
//!    recently used socket is reused first.
//! 2. **Admission Before Bookkeeping**: Capacity is enforced by the admission
//!    queue, independent of contention on the bookkeeping mutex.
//! 3. **Minimal Locking**: The mutex guards only vectors and counters; dialing
//!    and closing always happen outside it.
//! 4. **Release What You Acquired**: Each slot taken by `get` is returned by
//!    exactly one `put` or `remove`, including on dial failure.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnPool (Clone)
//!   └── inner: Arc<PoolInner>
//!         ├── opt: PoolOptions
//!         ├── admission: bounded channel, capacity = pool_size
//!         ├── state: Mutex<PoolState>
//!         │     ├── conns: Vec<conn id>      (every live connection)
//!         │     ├── idle_conns: Vec<Conn>    (LIFO)
//!         │     ├── pool_size                (accounted connections)
//!         │     └── pending_idle             (min-idle dials in flight)
//!         └── closed: AtomicBool
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::admission::Admission;
use crate::conn::Conn;
use crate::error::{PoolError, PoolResult};
use crate::options::PoolOptions;
use crate::stats::{PoolStats, StatsCounters};

/// Operations a client needs from a connection pool.
pub trait Pooler: Send + Sync {
    /// Dials a connection that does not count against capacity.
    fn new_conn(&self) -> PoolResult<Conn>;
    /// Drops a connection from bookkeeping, frees its admission slot if it was
    /// checked out, and closes it, returning the close error.
    fn close_conn(&self, conn: Conn) -> PoolResult<()>;
    /// Checks out a connection, reusing an idle one when possible.
    fn get(&self) -> PoolResult<Conn>;
    /// Returns a connection for reuse.
    fn put(&self, conn: Conn);
    /// Discards a connection.
    fn remove(&self, conn: Conn);
    /// Connections tracked by the pool.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Idle connections.
    fn idle_len(&self) -> usize;
    /// Activity counters.
    fn stats(&self) -> PoolStats;
    /// Refuses further checkouts and closes idle connections.
    fn close(&self) -> PoolResult<()>;
}

struct PoolState {
    conns: Vec<u64>,
    idle_conns: Vec<Conn>,
    pool_size: usize,
    pending_idle: usize,
}

impl PoolState {
    fn pop_idle(&mut self) -> Option<Conn> {
        self.idle_conns.pop()
    }

    /// Forgets `conn`; returns true when it was a tracked pooled connection.
    fn untrack(&mut self, conn: &Conn) -> bool {
        match self.conns.iter().position(|id| *id == conn.id()) {
            Some(pos) => {
                self.conns.swap_remove(pos);
                if conn.is_pooled() {
                    self.pool_size = self.pool_size.saturating_sub(1);
                    return true;
                }
                false
            }
            None => false,
        }
    }
}

struct PoolInner {
    opt: PoolOptions,
    admission: Admission,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    // Consecutive dial failures; reset by the next successful dial.
    dial_errors: AtomicU32,
    last_dial_error: RwLock<Option<String>>,
    stats: StatsCounters,
    closed: AtomicBool,
}

/// Thread-safe connection pool handle. Clones share the same pool.
#[derive(Clone)]
pub struct ConnPool {
    inner: Arc<PoolInner>,
}

impl ConnPool {
    /// Builds a pool and warms `min_idle_conns` idle connections.
    ///
    /// # Panics
    ///
    /// Panics when `opt.pool_size` is zero.
    pub fn new(opt: PoolOptions) -> Self {
        assert!(opt.pool_size > 0, "kvpool: pool_size must be greater than zero");

        let state = PoolState {
            conns: Vec::with_capacity(opt.pool_size),
            idle_conns: Vec::with_capacity(opt.pool_size),
            pool_size: 0,
            pending_idle: 0,
        };
        let pool = ConnPool {
            inner: Arc::new(PoolInner {
                admission: Admission::new(opt.pool_size),
                state: Mutex::new(state),
                next_id: AtomicU64::new(1),
                dial_errors: AtomicU32::new(0),
                last_dial_error: RwLock::new(None),
                stats: StatsCounters::default(),
                closed: AtomicBool::new(false),
                opt,
            }),
        };

        for _ in 0..pool.inner.opt.min_idle_conns {
            pool.check_min_idle_conns();
        }
        pool
    }

    /// Options the pool was built with.
    pub fn options(&self) -> &PoolOptions {
        &self.inner.opt
    }

    /// Dials a connection outside capacity accounting. Never reuses idle
    /// connections.
    pub fn new_conn(&self) -> PoolResult<Conn> {
        self.new_tracked_conn(false)
    }

    /// Checks out a connection.
    ///
    /// Waits up to `pool_timeout` for an admission slot, then pops the most
    /// recently returned idle connection, discarding stale ones, and dials a
    /// new one when none is left.
    pub fn get(&self) -> PoolResult<Conn> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        if !self.inner.admission.acquire(self.inner.opt.pool_timeout) {
            self.inner.stats.record_timeout();
            tracing::warn!(
                timeout = ?self.inner.opt.pool_timeout,
                "timed out waiting for a pool slot"
            );
            return Err(PoolError::Timeout);
        }

        loop {
            let popped = self.inner.state.lock().pop_idle();
            let Some(mut conn) = popped else {
                break;
            };

            let opt = &self.inner.opt;
            if conn.is_stale(opt.max_conn_age, opt.idle_timeout, Instant::now()) {
                self.inner.stats.record_stale();
                tracing::debug!(conn = conn.id(), "discarding stale idle connection");
                if let Err(err) = self.close_conn(conn) {
                    tracing::warn!(error = %err, "failed to close stale connection");
                }
                continue;
            }

            self.inner.stats.record_hit();
            tracing::trace!(conn = conn.id(), "reusing idle connection");
            conn.set_checked_out(true);
            return Ok(conn);
        }

        self.inner.stats.record_miss();
        match self.new_tracked_conn(true) {
            Ok(mut conn) => {
                conn.set_checked_out(true);
                Ok(conn)
            }
            Err(err) => {
                self.inner.admission.release();
                Err(err)
            }
        }
    }

    /// Returns a connection for reuse.
    ///
    /// Connections outside capacity accounting, and any connection returned
    /// after the pool was closed, are discarded instead.
    pub fn put(&self, mut conn: Conn) {
        if !conn.is_pooled() {
            self.remove(conn);
            return;
        }

        let mut state = self.inner.state.lock();
        // Checked under the lock so `close` cannot miss a connection it should drain.
        if self.is_closed() {
            drop(state);
            self.remove(conn);
            return;
        }
        let held_slot = conn.is_checked_out();
        conn.set_checked_out(false);
        state.idle_conns.push(conn);
        drop(state);

        // Idle first, then wake a waiter, so it finds the connection instead of dialing.
        if held_slot {
            self.inner.admission.release();
        }
    }

    /// Discards a connection: forgets it, frees its slot, closes the transport.
    ///
    /// Close errors are logged, not returned. Unknown connections are still
    /// closed.
    pub fn remove(&self, conn: Conn) {
        let id = conn.id();
        if let Err(err) = self.discard(conn) {
            tracing::warn!(conn = id, error = %err, "failed to close connection");
        }
    }

    /// Like [`remove`](Self::remove) but hands the close error back. A
    /// checked-out connection still gives its admission slot back.
    pub fn close_conn(&self, conn: Conn) -> PoolResult<()> {
        self.discard(conn).map_err(PoolError::Close)
    }

    /// Connections tracked by the pool, idle or checked out.
    pub fn len(&self) -> usize {
        self.inner.state.lock().conns.len()
    }

    /// Returns true when the pool tracks no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idle connections ready for reuse.
    pub fn idle_len(&self) -> usize {
        self.inner.state.lock().idle_conns.len()
    }

    /// Pooled connections accounted against `pool_size`.
    pub fn pooled_len(&self) -> usize {
        self.inner.state.lock().pool_size
    }

    /// Snapshot of pool activity.
    pub fn stats(&self) -> PoolStats {
        let (total_conns, idle_conns) = {
            let state = self.inner.state.lock();
            (state.conns.len(), state.idle_conns.len())
        };
        PoolStats {
            acquired: self.inner.admission.acquired(),
            released: self.inner.admission.released(),
            total_conns,
            idle_conns,
            ..self.inner.stats.snapshot()
        }
    }

    /// Admission slots currently held by checked-out connections.
    pub fn outstanding(&self) -> usize {
        self.inner.admission.outstanding()
    }

    /// Consecutive dial failures since the last successful dial.
    pub fn dial_errors(&self) -> u32 {
        self.inner.dial_errors.load(Ordering::Relaxed)
    }

    /// Message of the most recent dial failure.
    pub fn last_dial_error(&self) -> Option<String> {
        self.inner.last_dial_error.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the pool.
    ///
    /// Later `get`/`new_conn` calls fail with `Closed`. Idle connections are
    /// closed now; checked-out ones when their holder returns them. Returns the
    /// first close error, or `Closed` if the pool was already closed.
    pub fn close(&self) -> PoolResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(PoolError::Closed);
        }

        let idle = {
            let mut state = self.inner.state.lock();
            let idle = std::mem::take(&mut state.idle_conns);
            for conn in &idle {
                state.untrack(conn);
            }
            idle
        };

        let mut first_err = None;
        for conn in idle {
            if let Err(err) = conn.close() {
                first_err.get_or_insert(err);
            }
        }
        tracing::info!("connection pool closed");

        match first_err {
            Some(err) => Err(PoolError::Close(err)),
            None => Ok(()),
        }
    }

    fn discard(&self, conn: Conn) -> std::io::Result<()> {
        let was_pooled = self.inner.state.lock().untrack(&conn);
        if conn.is_checked_out() {
            self.inner.admission.release();
        }
        let result = conn.close();
        if was_pooled {
            self.check_min_idle_conns();
        }
        result
    }

    /// Dials one idle connection when the pool is below `min_idle_conns` and
    /// has capacity left.
    fn check_min_idle_conns(&self) {
        let opt = &self.inner.opt;
        if opt.min_idle_conns == 0 || self.is_closed() {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            let warming = state.idle_conns.len() + state.pending_idle;
            if state.pool_size >= opt.pool_size || warming >= opt.min_idle_conns {
                return;
            }
            // Reserve capacity before dialing so concurrent checks cannot overshoot.
            state.pool_size += 1;
            state.pending_idle += 1;
        }

        match self.dial(true) {
            Ok(conn) => {
                let mut state = self.inner.state.lock();
                state.pending_idle -= 1;
                if self.is_closed() {
                    state.pool_size -= 1;
                    drop(state);
                    if let Err(err) = conn.close() {
                        tracing::warn!(error = %err, "failed to close idle connection after pool close");
                    }
                    return;
                }
                state.conns.push(conn.id());
                state.idle_conns.push(conn);
            }
            Err(err) => {
                let mut state = self.inner.state.lock();
                state.pending_idle -= 1;
                state.pool_size -= 1;
                drop(state);
                tracing::warn!(error = %err, "failed to create idle connection");
            }
        }
    }

    fn new_tracked_conn(&self, pooled: bool) -> PoolResult<Conn> {
        let mut conn = self.dial(pooled)?;
        let mut state = self.inner.state.lock();
        state.conns.push(conn.id());
        if pooled {
            if state.pool_size < self.inner.opt.pool_size {
                state.pool_size += 1;
            } else {
                conn.set_pooled(false);
            }
        }
        Ok(conn)
    }

    fn dial(&self, pooled: bool) -> PoolResult<Conn> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        match (self.inner.opt.dialer)() {
            Ok(transport) => {
                self.inner.dial_errors.store(0, Ordering::Relaxed);
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(conn = id, pooled, "dialed new connection");
                Ok(Conn::new(id, transport, pooled))
            }
            Err(err) => {
                let failures = self.inner.dial_errors.fetch_add(1, Ordering::Relaxed) + 1;
                *self.inner.last_dial_error.write() = Some(err.to_string());
                tracing::warn!(error = %err, failures, "dial failed");
                Err(PoolError::Dial(err))
            }
        }
    }
}

impl Pooler for ConnPool {
    fn new_conn(&self) -> PoolResult<Conn> {
        ConnPool::new_conn(self)
    }

    fn close_conn(&self, conn: Conn) -> PoolResult<()> {
        ConnPool::close_conn(self, conn)
    }

    fn get(&self) -> PoolResult<Conn> {
        ConnPool::get(self)
    }

    fn put(&self, conn: Conn) {
        ConnPool::put(self, conn)
    }

    fn remove(&self, conn: Conn) {
        ConnPool::remove(self, conn)
    }

    fn len(&self) -> usize {
        ConnPool::len(self)
    }

    fn idle_len(&self) -> usize {
        ConnPool::idle_len(self)
    }

    fn stats(&self) -> PoolStats {
        ConnPool::stats(self)
    }

    fn close(&self) -> PoolResult<()> {
        ConnPool::close(self)
    }
}

impl std::fmt::Debug for ConnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnPool")
            .field("options", &self.inner.opt)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
