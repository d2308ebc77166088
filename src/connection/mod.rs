//! Retrying Connection
//!
//! A [`RetryingConnection`] wraps one session pool for one database and runs
//! every query through a bounded retry loop.
//!
//! # Retry Policy
//! Only faults whose named code is transient (`ETIMEOUT`, `ECONNCLOSED`,
//! `ECONNRESET`, `ESOCKET`, `ECONNREFUSED`) are retried, at most 3 times. Before
//! each retry the pool is torn down and reopened (a failed reopen is swallowed),
//! then the task sleeps `(attempt + 1)^2 * 100ms`. Server errors such as a bad
//! column name are never retried.
//!
//! Connection establishment is lazy: constructing a `RetryingConnection` does
//! no I/O until [`Connection::connect`] is called.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::{Connector, ConnectionConfig, QueryParam, Recordset, SessionPool};
use crate::error::RawFault;

/// Driver codes treated as transient network failures
pub const TRANSIENT_CODES: &[&str] = &[
    "ETIMEOUT",
    "ECONNCLOSED",
    "ECONNRESET",
    "ESOCKET",
    "ECONNREFUSED",
];

/// Probe used by [`Connection::test_connection`]
pub const PROBE_QUERY: &str = "SELECT 1 AS test";

/// Whether a fault is worth retrying
#[must_use]
pub fn is_transient(fault: &RawFault) -> bool {
    fault.code.as_deref().is_some_and(|code| TRANSIENT_CODES.contains(&code))
}

/// Bounded retry with quadratic backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (0-based attempt index)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = (attempt + 1).saturating_mul(attempt + 1);
        self.base_delay.saturating_mul(factor)
    }
}

/// A connection to one database, as seen by the pool manager
///
/// Driver-level failures are returned raw; callers classify them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the underlying pool; no-op when already connected
    async fn connect(&self) -> Result<(), RawFault>;

    /// Close the underlying pool; safe to call when not connected
    async fn disconnect(&self) -> Result<(), RawFault>;

    /// Run SQL text without parameters
    async fn query(&self, sql: &str) -> Result<Recordset, RawFault>;

    /// Run SQL text with bound `@name` parameters
    async fn query_with_params(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Recordset, RawFault>;

    /// Connect and run a trivial probe; true only if it returns a row
    async fn test_connection(&self) -> bool;

    fn is_connected(&self) -> bool;

    fn config(&self) -> &ConnectionConfig;
}

/// A [`Connection`] with transient-fault retry
pub struct RetryingConnection {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    pool: Mutex<Option<Arc<dyn SessionPool>>>,
    /// Serializes pool establishment so concurrent callers open one pool
    connect_lock: tokio::sync::Mutex<()>,
}

impl RetryingConnection {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_policy(config, connector, RetryPolicy::default())
    }

    pub fn with_policy(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            config,
            connector,
            policy,
            pool: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn current_pool(&self) -> Option<Arc<dyn SessionPool>> {
        self.pool.lock().clone()
    }

    async fn execute(
        &self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> Result<Recordset, RawFault> {
        let mut attempt = 0;

        loop {
            let pool = match self.current_pool() {
                Some(pool) => Ok(pool),
                // First attempt requires a prior connect; retries reopen so the
                // persisting fault is the one reported
                None if attempt == 0 => return Err(RawFault::not_connected()),
                None => self
                    .connect()
                    .await
                    .and_then(|()| self.current_pool().ok_or_else(RawFault::not_connected)),
            };

            let result = match pool {
                Ok(pool) => match params {
                    Some(params) => pool.query(sql, params).await,
                    None => pool.simple_query(sql).await,
                },
                Err(fault) => Err(fault),
            };

            let fault = match result {
                Ok(recordset) => return Ok(recordset),
                Err(fault) => fault,
            };

            if attempt >= self.policy.max_retries || !is_transient(&fault) {
                return Err(fault);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                code = fault.code.as_deref().unwrap_or_default(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Transient database fault, reconnecting"
            );

            if let Err(e) = self.disconnect().await {
                debug!(error = %e, "Ignoring disconnect failure during retry");
            }
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Reconnect failed, next attempt will report it");
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Connection for RetryingConnection {
    async fn connect(&self) -> Result<(), RawFault> {
        let _guard = self.connect_lock.lock().await;
        if self.pool.lock().is_some() {
            return Ok(());
        }

        let pool = self.connector.open(&self.config).await?;
        *self.pool.lock() = Some(pool);
        debug!(database = ?self.config.database, "Connection established");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RawFault> {
        let pool = self.pool.lock().take();
        match pool {
            Some(pool) => pool.close().await,
            None => Ok(()),
        }
    }

    async fn query(&self, sql: &str) -> Result<Recordset, RawFault> {
        self.execute(sql, None).await
    }

    async fn query_with_params(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Recordset, RawFault> {
        self.execute(sql, Some(params)).await
    }

    async fn test_connection(&self) -> bool {
        if let Err(e) = self.connect().await {
            debug!(error = %e, "Connection test failed to connect");
            return false;
        }
        match self.query(PROBE_QUERY).await {
            Ok(recordset) => !recordset.is_empty(),
            Err(e) => {
                debug!(error = %e, "Connection test probe failed");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.pool.lock().is_some()
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}
