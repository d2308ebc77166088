//! Connection Pool Manager Tests
//!
//! Exercises per-database pooling with a counting mock connection:
//! - Same instance for repeated requests within the idle window
//! - Sliding idle expiry and exactly-once disconnect on eviction
//! - The default pool is never evicted
//! - `close_all` disconnects everything once and leaves the manager usable
//!
//! Idle timers run on Tokio's paused clock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tsql_warden::{Connection, ConnectionConfig, ConnectionManager, QueryParam, RawFault, Recordset};

const IDLE: Duration = Duration::from_millis(300_000);
const TICK: Duration = Duration::from_millis(1);

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    disconnects: AtomicUsize,
}

struct Tracked {
    config: ConnectionConfig,
    counters: Arc<Counters>,
    fail_disconnect: bool,
}

#[async_trait]
impl Connection for Tracked {
    async fn connect(&self) -> Result<(), RawFault> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RawFault> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(RawFault::with_code("ESOCKET", "already gone"));
        }
        Ok(())
    }

    async fn query(&self, _sql: &str) -> Result<Recordset, RawFault> {
        Ok(Recordset::default())
    }

    async fn query_with_params(
        &self,
        _sql: &str,
        _params: &[QueryParam],
    ) -> Result<Recordset, RawFault> {
        Ok(Recordset::default())
    }

    async fn test_connection(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

fn manager_with(fail_disconnect: bool) -> (ConnectionManager<Tracked>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let base = ConnectionConfig::new("localhost", "reader", "pw").with_database("master");
    let shared = Arc::clone(&counters);
    let manager = ConnectionManager::with_factory(base, IDLE, move |config| {
        shared.created.fetch_add(1, Ordering::SeqCst);
        Tracked {
            config,
            counters: Arc::clone(&shared),
            fail_disconnect,
        }
    });
    (manager, counters)
}

fn manager() -> (ConnectionManager<Tracked>, Arc<Counters>) {
    manager_with(false)
}

/// Let spawned eviction tasks finish after the clock moves
async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
    settle().await;
}

// ============================================================================
// Reuse
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_same_instance_within_idle_window() {
    let (m, counters) = manager();

    let first = m.get_connection(Some("Sales"));
    advance(IDLE - TICK).await;
    let second = m.get_connection(Some("Sales"));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(second.config().database.as_deref(), Some("Sales"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_connection() {
    let (m, counters) = manager();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let m = m.clone();
            tokio::spawn(async move { m.get_connection(Some("Reports")) })
        })
        .collect();

    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap());
    }

    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    m.close_all().await;
}

// ============================================================================
// Idle Eviction
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_pool_is_evicted_once() {
    let (m, counters) = manager();
    let _ = m.get_connection(Some("Sales"));

    advance(IDLE + TICK).await;

    assert!(!m.contains(Some("Sales")));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);

    advance(IDLE * 10).await;
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reuse_slides_the_expiry() {
    let (m, counters) = manager();
    let _ = m.get_connection(Some("Sales"));

    advance(IDLE - TICK).await;
    let _ = m.get_connection(Some("Sales"));

    // Past the first deadline but inside the re-armed one
    advance(IDLE - TICK).await;
    assert!(m.contains(Some("Sales")));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 0);

    advance(TICK * 2).await;
    assert!(!m.contains(Some("Sales")));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_database_gets_a_fresh_connection() {
    let (m, counters) = manager();
    let first = m.get_connection(Some("Sales"));

    advance(IDLE + TICK).await;
    let second = m.get_connection(Some("Sales"));

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_default_pool_is_never_evicted() {
    let (m, counters) = manager();
    let default = m.get_connection(None);

    advance(IDLE * 10).await;

    assert!(m.contains(None));
    assert!(Arc::ptr_eq(&default, &m.get_connection(Some("master"))));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_disconnect_still_evicts() {
    let (m, counters) = manager_with(true);
    let _ = m.get_connection(Some("Sales"));

    advance(IDLE + TICK).await;

    assert!(!m.contains(Some("Sales")));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_all_disconnects_each_once() {
    let (m, counters) = manager();
    let old = m.get_connection(Some("A"));
    let _ = m.get_connection(Some("B"));
    let _ = m.get_connection(None);
    assert_eq!(m.pool_count(), 3);

    m.close_all().await;
    assert_eq!(m.pool_count(), 0);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 3);

    // Cancelled timers never fire
    advance(IDLE * 2).await;
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 3);

    // The manager stays usable
    let fresh = m.get_connection(Some("A"));
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(m.pool_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_all_continues_past_failures() {
    let (m, counters) = manager_with(true);
    let _ = m.get_connection(Some("A"));
    let _ = m.get_connection(Some("B"));

    m.close_all().await;

    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 2);
    assert_eq!(m.pool_count(), 0);
}
