//! # Pool Statistics
//!
//! Atomic counters aggregated on the pool's hot path and exposed as a plain
//! snapshot struct.
//!
//! `Ordering::Relaxed` is enough: counters are independent and only need to be
//! eventually consistent with each other.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `get` calls served from the idle stack.
    pub hits: u64,
    /// `get` calls that had to dial.
    pub misses: u64,
    /// `get` calls that gave up waiting for a slot.
    pub timeouts: u64,
    /// Idle connections discarded for age or idleness.
    pub stale_conns: u64,
    /// Admission slots handed out so far.
    pub acquired: u64,
    /// Admission slots given back so far.
    pub released: u64,
    /// Connections tracked by the pool (`len`).
    pub total_conns: usize,
    /// Idle connections (`idle_len`).
    pub idle_conns: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    stale_conns: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale_conns.fetch_add(1, Ordering::Relaxed);
    }

    /// Fills the counter fields; callers add the gauges they own.
    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            stale_conns: self.stale_conns.load(Ordering::Relaxed),
            ..PoolStats::default()
        }
    }
}
