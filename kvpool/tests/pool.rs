use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kvpool::{ConnPool, Dialer, PeerAddr, PoolError, PoolOptions, Transport};

struct MemTransport {
    written: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
}

impl Read for MemTransport {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for MemTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemTransport {
    fn peer_addr(&self) -> io::Result<PeerAddr> {
        Ok(PeerAddr::Inet("127.0.0.1:6379".parse().unwrap()))
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts dials and closes; can be switched to refuse dials.
#[derive(Clone, Default)]
struct DialCounter {
    dials: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl DialCounter {
    fn dialer(&self) -> Dialer {
        let counter = self.clone();
        kvpool::dialer(move || {
            if counter.refuse.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            counter.dials.fetch_add(1, Ordering::SeqCst);
            Ok(MemTransport {
                written: counter.written.clone(),
                closes: counter.closes.clone(),
            })
        })
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pool_with(counter: &DialCounter, pool_size: usize) -> ConnPool {
    init_tracing();
    ConnPool::new(
        PoolOptions::new(counter.dialer())
            .pool_size(pool_size)
            .pool_timeout(Duration::from_millis(100)),
    )
}

#[test]
fn min_idle_conns_are_warmed_on_construction() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(PoolOptions::new(counter.dialer()).pool_size(5).min_idle_conns(3));

    assert_eq!(pool.idle_len(), 3);
    assert_eq!(pool.len(), 3);
    assert_eq!(pool.pooled_len(), 3);
    assert_eq!(counter.dials(), 3);
}

#[test]
fn min_idle_never_exceeds_pool_size() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(PoolOptions::new(counter.dialer()).pool_size(2).min_idle_conns(5));

    assert_eq!(pool.idle_len(), 2);
    assert_eq!(pool.pooled_len(), 2);
}

#[test]
fn idle_connections_are_reused_most_recent_first() {
    let counter = DialCounter::default();
    let pool = pool_with(&counter, 4);

    let a = pool.get().expect("get a");
    let b = pool.get().expect("get b");
    let (a_id, b_id) = (a.id(), b.id());
    pool.put(a);
    pool.put(b);
    assert_eq!(pool.idle_len(), 2);

    let reused = pool.get().expect("reuse");
    assert_eq!(reused.id(), b_id);
    assert_ne!(reused.id(), a_id);
    assert_eq!(counter.dials(), 2);

    let stats = pool.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
    pool.put(reused);
}

#[test]
fn idle_plus_checked_out_matches_len() {
    let counter = DialCounter::default();
    let pool = pool_with(&counter, 3);
    let mut held = Vec::new();

    for step in 0..12 {
        if step % 3 == 2 {
            if let Some(conn) = held.pop() {
                pool.put(conn);
            }
        } else if held.len() < 3 {
            held.push(pool.get().expect("get"));
        }
        assert_eq!(pool.idle_len() + held.len(), pool.len(), "step {}", step);
        assert!(pool.pooled_len() <= 3);
    }

    for conn in held.drain(..) {
        pool.put(conn);
    }
    assert_eq!(pool.idle_len(), pool.len());
}

#[test]
fn exhausted_pool_times_out() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(
        PoolOptions::new(counter.dialer())
            .pool_size(2)
            .pool_timeout(Duration::from_millis(50)),
    );

    let a = pool.get().expect("first");
    let b = pool.get().expect("second");

    let start = Instant::now();
    let err = pool.get().expect_err("pool is exhausted");
    assert!(matches!(err, PoolError::Timeout));
    assert!(err.is_retryable());
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(pool.stats().timeouts, 1);
    assert_eq!(pool.outstanding(), 2);

    pool.put(a);
    pool.put(b);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn waiter_gets_the_returned_connection() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(
        PoolOptions::new(counter.dialer())
            .pool_size(1)
            .pool_timeout(Duration::from_secs(2)),
    );

    let conn = pool.get().expect("get");
    let id = conn.id();
    let returner = pool.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        returner.put(conn);
    });

    let again = pool.get().expect("waiter");
    handle.join().unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(counter.dials(), 1);
    pool.put(again);
}

#[test]
fn put_of_unpooled_connection_discards_it() {
    let counter = DialCounter::default();
    let pool = pool_with(&counter, 2);

    let conn = pool.new_conn().expect("new_conn");
    assert!(!conn.is_pooled());
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.pooled_len(), 0);

    pool.put(conn);
    assert_eq!(pool.idle_len(), 0);
    assert_eq!(pool.len(), 0);
    assert_eq!(counter.closes(), 1);

    let stats = pool.stats();
    assert_eq!(stats.acquired, 0);
    assert_eq!(stats.released, 0);
}

#[test]
fn dial_failure_releases_the_slot() {
    let counter = DialCounter::default();
    counter.refuse.store(true, Ordering::SeqCst);
    let pool = pool_with(&counter, 1);

    for attempt in 1..=3u32 {
        let err = pool.get().expect_err("dial refused");
        assert!(matches!(err, PoolError::Dial(_)), "attempt {}: {:?}", attempt, err);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.dial_errors(), attempt);
    }
    assert!(pool.last_dial_error().unwrap().contains("refused"));
    assert_eq!(pool.len(), 0);

    counter.refuse.store(false, Ordering::SeqCst);
    let conn = pool.get().expect("dial recovers");
    assert_eq!(pool.dial_errors(), 0);
    pool.put(conn);
}

#[test]
fn stale_idle_connections_are_discarded_on_get() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(
        PoolOptions::new(counter.dialer())
            .pool_size(2)
            .idle_timeout(Duration::from_millis(20)),
    );

    let conn = pool.get().expect("get");
    let first = conn.id();
    pool.put(conn);
    thread::sleep(Duration::from_millis(40));

    let fresh = pool.get().expect("get after idle timeout");
    assert_ne!(fresh.id(), first);
    assert_eq!(counter.closes(), 1);
    assert_eq!(pool.stats().stale_conns, 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.pooled_len(), 1);
    // Discarding the stale connection kept the caller's slot.
    assert_eq!(pool.outstanding(), 1);
    pool.put(fresh);
}

#[test]
fn old_connections_are_discarded_on_get() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(
        PoolOptions::new(counter.dialer())
            .pool_size(2)
            .max_conn_age(Duration::from_millis(20)),
    );

    let mut conn = pool.get().expect("get");
    let first = conn.id();
    thread::sleep(Duration::from_millis(40));
    // Recent use does not save a connection past its maximum age.
    conn.write_all(b"PING").unwrap();
    pool.put(conn);

    let fresh = pool.get().expect("get after max age");
    assert_ne!(fresh.id(), first);
    assert_eq!(pool.stats().stale_conns, 1);
    pool.put(fresh);
}

#[test]
fn close_conn_gives_the_slot_back() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(PoolOptions::new(counter.dialer()).pool_size(2).min_idle_conns(1));

    let conn = pool.get().expect("get");
    assert_eq!(pool.outstanding(), 1);

    pool.close_conn(conn).expect("close_conn");
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(counter.closes(), 1);
    // Same refill as `remove`.
    assert_eq!(pool.idle_len(), 1);
    assert_eq!(pool.len(), 1);

    let stats = pool.stats();
    assert_eq!(stats.acquired, stats.released);
}

#[test]
fn remove_refills_min_idle() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(PoolOptions::new(counter.dialer()).pool_size(3).min_idle_conns(1));
    assert_eq!(pool.idle_len(), 1);

    let conn = pool.get().expect("get");
    assert_eq!(pool.idle_len(), 0);

    pool.remove(conn);
    assert_eq!(counter.closes(), 1);
    assert_eq!(pool.idle_len(), 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.outstanding(), 0);
}

/// Dialer whose second dial, the first min-idle refill after warmup, blocks
/// until the returned sender fires. `entered` receives once that dial starts.
struct GatedDial {
    dialer: Dialer,
    entered: mpsc::Receiver<()>,
    gate: mpsc::Sender<()>,
}

impl DialCounter {
    fn gated_dialer(&self) -> GatedDial {
        let (entered_tx, entered) = mpsc::channel::<()>();
        let (gate, gate_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let gate_rx = Mutex::new(gate_rx);
        let counter = self.clone();
        let dialer = kvpool::dialer(move || -> io::Result<MemTransport> {
            let n = counter.dials.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 2 {
                entered_tx.lock().unwrap().send(()).unwrap();
                gate_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5))
                    .unwrap();
            }
            Ok(MemTransport {
                written: counter.written.clone(),
                closes: counter.closes.clone(),
            })
        });
        GatedDial { dialer, entered, gate }
    }
}

#[test]
fn dial_at_capacity_is_discarded_on_put() {
    init_tracing();
    let counter = DialCounter::default();
    let GatedDial { dialer, entered, gate } = counter.gated_dialer();
    let pool = ConnPool::new(
        PoolOptions::new(dialer)
            .pool_size(1)
            .min_idle_conns(1)
            .pool_timeout(Duration::from_secs(2)),
    );
    assert_eq!(pool.idle_len(), 1);

    let warm = pool.get().expect("get warm");
    let refiller = pool.clone();
    let handle = thread::spawn(move || refiller.remove(warm));
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("refill dial started");

    // The refill holds the only unit of capacity, so this dial lands outside it.
    let extra = pool.get().expect("get while refilling");
    assert!(!extra.is_pooled());
    assert_eq!(pool.pooled_len(), 1);
    let idle_before = pool.idle_len();

    pool.put(extra);
    assert_eq!(pool.idle_len(), idle_before);
    assert_eq!(counter.closes(), 2);

    gate.send(()).unwrap();
    handle.join().unwrap();

    assert_eq!(counter.dials(), 3);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.idle_len(), 1);
    assert_eq!(pool.pooled_len(), 1);
    let stats = pool.stats();
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn refill_finishing_after_close_is_closed() {
    init_tracing();
    let counter = DialCounter::default();
    let GatedDial { dialer, entered, gate } = counter.gated_dialer();
    let pool = ConnPool::new(PoolOptions::new(dialer).pool_size(2).min_idle_conns(1));

    let warm = pool.get().expect("get warm");
    let refiller = pool.clone();
    let handle = thread::spawn(move || refiller.remove(warm));
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("refill dial started");

    pool.close().expect("close");
    gate.send(()).unwrap();
    handle.join().unwrap();

    assert_eq!(counter.dials(), 2);
    assert_eq!(counter.closes(), 2);
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.idle_len(), 0);
    assert_eq!(pool.pooled_len(), 0);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn concurrent_get_put_balances_slots() {
    init_tracing();
    let counter = DialCounter::default();
    let pool = ConnPool::new(
        PoolOptions::new(counter.dialer())
            .pool_size(4)
            .pool_timeout(Duration::from_secs(5)),
    );
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            thread::spawn(move || {
                let conn = pool.get().expect("get");
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                pool.put(conn);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.acquired, 16);
    assert_eq!(stats.released, 16);
    assert_eq!(stats.hits + stats.misses, 16);
    assert_eq!(pool.outstanding(), 0);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(pool.len() <= 4);
    assert_eq!(pool.idle_len(), pool.len());
}

#[test]
fn closed_pool_refuses_get_from_every_thread() {
    let counter = DialCounter::default();
    let pool = ConnPool::new(PoolOptions::new(counter.dialer()).pool_size(4).min_idle_conns(2));

    pool.close().expect("close");
    assert!(pool.is_closed());
    assert_eq!(pool.idle_len(), 0);
    assert_eq!(counter.closes(), 2);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || matches!(pool.get(), Err(PoolError::Closed)))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    assert!(matches!(pool.new_conn(), Err(PoolError::Closed)));
    assert!(matches!(pool.close(), Err(PoolError::Closed)));
}

#[test]
fn connection_returned_after_close_is_discarded() {
    let counter = DialCounter::default();
    let pool = pool_with(&counter, 2);

    let conn = pool.get().expect("get");
    pool.close().expect("close");
    assert_eq!(pool.len(), 1);

    pool.put(conn);
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.idle_len(), 0);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(counter.closes(), 1);
}

#[test]
fn writes_reach_the_transport() {
    let counter = DialCounter::default();
    let pool = pool_with(&counter, 1);

    let mut conn = pool.get().expect("get");
    conn.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
    assert_eq!(conn.remote_addr().unwrap().to_string(), "127.0.0.1:6379");
    pool.put(conn);

    assert_eq!(&*counter.written.lock().unwrap(), b"*1\r\n$4\r\nPING\r\n");
}
