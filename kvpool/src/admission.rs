//! # Admission Queue
//!
//! Bounds how many pooled connections are checked out at once. A slot is a
//! token in a bounded channel: acquiring pushes a token, releasing pops one.
//!
//! The fast path is a non-blocking `try_send`; only when every slot is taken
//! does the caller block on `send_timeout`. The deadline lives inside the
//! channel, so there are no timer objects to recycle or leak.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};

pub(crate) struct Admission {
    tx: Sender<()>,
    rx: Receiver<()>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl Admission {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Admission {
            tx,
            rx,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Takes one slot, waiting at most `timeout`. Returns false on timeout.
    pub(crate) fn acquire(&self, timeout: Duration) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => match self.tx.send_timeout((), timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(())) => return false,
                // Both ends live in `self`, so the channel cannot disconnect.
                Err(SendTimeoutError::Disconnected(())) => return false,
            },
            Err(TrySendError::Disconnected(())) => return false,
        }
        self.acquired.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(outstanding = self.tx.len(), "admission slot acquired");
        true
    }

    /// Gives one slot back. Every successful `acquire` is paired with exactly
    /// one call.
    pub(crate) fn release(&self) {
        if self.rx.try_recv().is_err() {
            tracing::error!("admission slot released without a matching acquire");
            return;
        }
        self.released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(outstanding = self.rx.len(), "admission slot released");
    }

    /// Slots currently held.
    pub(crate) fn outstanding(&self) -> usize {
        self.tx.len()
    }

    pub(crate) fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub(crate) fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}
