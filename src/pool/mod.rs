//! Connection Pool Manager
//!
//! Owns one long-lived [`Connection`] per target database name.
//!
//! # Pool Keys
//! The key is the requested database name, else the base config's database,
//! else the empty string. That fallback key is the *default* pool: it lives as
//! long as the manager and is never evicted.
//!
//! # Idle Eviction
//! Every non-default entry carries an idle timer. Reusing the key cancels and
//! re-arms it (sliding expiration); when it fires the entry is removed and its
//! connection disconnected, best-effort.
//!
//! Timers are spawned tasks holding a `Weak` reference to the manager and the
//! generation they were armed for. A timer whose generation no longer matches
//! the entry (re-armed or replaced) does nothing.
//!
//! # Atomic Creation
//! Lookup and insert happen under one lock with no `.await` in between, so
//! concurrent requests for an unseen key never create two connections.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, RetryingConnection};
use crate::engine::{Connector, ConnectionConfig};

/// Idle time after which a non-default pool is closed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Builds a not-yet-connected connection for a config
pub type ConnectionFactory<C> = Arc<dyn Fn(ConnectionConfig) -> C + Send + Sync>;

struct PoolEntry<C> {
    connection: Arc<C>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl<C> PoolEntry<C> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner<C> {
    base: ConnectionConfig,
    default_key: String,
    idle_timeout: Duration,
    factory: ConnectionFactory<C>,
    state: Mutex<PoolState<C>>,
}

struct PoolState<C> {
    entries: HashMap<String, PoolEntry<C>>,
    next_generation: u64,
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        for entry in self.state.get_mut().entries.values_mut() {
            entry.cancel_timer();
        }
    }
}

/// Per-database connection cache with idle reclamation
pub struct ConnectionManager<C: Connection + 'static = RetryingConnection> {
    inner: Arc<Inner<C>>,
}

impl<C: Connection + 'static> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionManager<RetryingConnection> {
    /// Manager whose connections retry through `connector`
    pub fn new(
        base: ConnectionConfig,
        idle_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_factory(base, idle_timeout, move |config| {
            RetryingConnection::new(config, Arc::clone(&connector))
        })
    }
}

impl<C: Connection + 'static> ConnectionManager<C> {
    pub fn with_factory(
        base: ConnectionConfig,
        idle_timeout: Duration,
        factory: impl Fn(ConnectionConfig) -> C + Send + Sync + 'static,
    ) -> Self {
        let default_key = base.database.clone().unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                base,
                default_key,
                idle_timeout,
                factory: Arc::new(factory),
                state: Mutex::new(PoolState {
                    entries: HashMap::new(),
                    next_generation: 0,
                }),
            }),
        }
    }

    /// Base configuration every pool is derived from
    #[must_use]
    pub fn base_config(&self) -> &ConnectionConfig {
        &self.inner.base
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Pool key a request for `database` resolves to
    #[must_use]
    pub fn resolve_key(&self, database: Option<&str>) -> String {
        database
            .filter(|db| !db.is_empty())
            .map_or_else(|| self.inner.default_key.clone(), str::to_string)
    }

    /// Connection for `database`, created on first use
    ///
    /// The returned connection may not be connected yet. Must be called
    /// within a Tokio runtime (idle timers are spawned tasks).
    pub fn get_connection(&self, database: Option<&str>) -> Arc<C> {
        let key = self.resolve_key(database);
        let is_default = key == self.inner.default_key;

        let mut state = self.inner.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        if let Some(entry) = state.entries.get_mut(&key) {
            if !is_default {
                entry.cancel_timer();
                entry.generation = generation;
                entry.timer = Some(self.arm_timer(key.clone(), generation));
            }
            debug!(database = %key, "Reusing connection pool");
            return Arc::clone(&entry.connection);
        }

        let config = if is_default {
            self.inner.base.clone()
        } else {
            self.inner.base.clone().with_database(key.clone())
        };
        let connection = Arc::new((self.inner.factory)(config));
        let timer = (!is_default).then(|| self.arm_timer(key.clone(), generation));

        debug!(database = %key, default = is_default, "Creating connection pool");
        state.entries.insert(
            key,
            PoolEntry {
                connection: Arc::clone(&connection),
                timer,
                generation,
            },
        );

        connection
    }

    fn arm_timer(&self, key: String, generation: u64) -> JoinHandle<()> {
        let weak: Weak<Inner<C>> = Arc::downgrade(&self.inner);
        let idle_timeout = self.inner.idle_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };

            let evicted = {
                let mut state = inner.state.lock();
                match state.entries.get(&key) {
                    Some(entry) if entry.generation == generation => state.entries.remove(&key),
                    _ => None,
                }
            };

            if let Some(entry) = evicted {
                info!(database = %key, "Closing idle connection pool");
                if let Err(e) = entry.connection.disconnect().await {
                    warn!(database = %key, error = %e, "Failed to close idle connection pool");
                }
            }
        })
    }

    /// Number of live pools, default included
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Whether a pool exists for `database`
    #[must_use]
    pub fn contains(&self, database: Option<&str>) -> bool {
        let key = self.resolve_key(database);
        self.inner.state.lock().entries.contains_key(&key)
    }

    /// Cancel every timer and disconnect every pool concurrently
    ///
    /// Failures are logged and do not stop the others. The manager stays
    /// usable; later requests create fresh pools.
    pub async fn close_all(&self) {
        let drained: Vec<(String, PoolEntry<C>)> = {
            let mut state = self.inner.state.lock();
            state.entries.drain().collect()
        };

        let count = drained.len();
        let closes = drained.into_iter().map(|(key, mut entry)| {
            entry.cancel_timer();
            async move {
                if let Err(e) = entry.connection.disconnect().await {
                    warn!(database = %key, error = %e, "Failed to close connection pool");
                }
            }
        });
        join_all(closes).await;

        info!(count, "Closed all connection pools");
    }
}
