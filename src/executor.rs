//! Validated Query Execution
//!
//! The only path by which SQL reaches a connection. Every query is validated,
//! sanitized and row-capped before a connection is touched; driver faults
//! that survive the retry layer are classified into [`WardenError`]s.

use tracing::debug;

use crate::classifier::classify;
use crate::connection::{Connection, RetryingConnection};
use crate::engine::{QueryParam, Recordset};
use crate::error::{Result, WardenError};
use crate::pool::ConnectionManager;
use crate::security::prepare_query;

fn fault_to_error(fault: crate::error::RawFault) -> WardenError {
    classify(Some(&fault))
}

/// Runs read-only queries against the managed pools
pub struct QueryExecutor<C: Connection + 'static = RetryingConnection> {
    manager: ConnectionManager<C>,
}

impl<C: Connection + 'static> Clone for QueryExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<C: Connection + 'static> QueryExecutor<C> {
    #[must_use]
    pub const fn new(manager: ConnectionManager<C>) -> Self {
        Self { manager }
    }

    #[must_use]
    pub const fn manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    /// Row cap used when a caller gives none
    #[must_use]
    pub fn max_rows(&self) -> u32 {
        self.manager.base_config().max_rows
    }

    /// Pooled connection for `database`, connected
    ///
    /// # Errors
    /// Returns the classified fault when the pool cannot be established.
    pub async fn connected(&self, database: Option<&str>) -> Result<std::sync::Arc<C>> {
        let connection = self.manager.get_connection(database);
        connection.connect().await.map_err(fault_to_error)?;
        Ok(connection)
    }

    /// Validate, sanitize and cap `query`, then run it without parameters
    ///
    /// # Errors
    /// Validation failures are returned before any connection is touched.
    /// Execution failures are classified.
    pub async fn execute_validated(
        &self,
        query: &str,
        max_rows_override: Option<u32>,
        database: Option<&str>,
    ) -> Result<Recordset> {
        let sql = prepare_query(query, max_rows_override.unwrap_or_else(|| self.max_rows()))?;
        debug!(database = ?database, "Executing validated query");

        let connection = self.connected(database).await?;
        connection.query(&sql).await.map_err(fault_to_error)
    }

    /// Same pipeline as [`Self::execute_validated`] with bound parameters
    ///
    /// The row cap is always the configured maximum.
    ///
    /// # Errors
    /// Validation failures are returned before any connection is touched.
    /// Execution failures are classified.
    pub async fn execute_validated_with_params(
        &self,
        query: &str,
        params: &[QueryParam],
        database: Option<&str>,
    ) -> Result<Recordset> {
        let sql = prepare_query(query, self.max_rows())?;
        debug!(
            database = ?database,
            params = params.len(),
            "Executing validated parameterized query"
        );

        let connection = self.connected(database).await?;
        connection.query_with_params(&sql, params).await.map_err(fault_to_error)
    }

    /// Close every pool
    pub async fn shutdown(&self) {
        self.manager.close_all().await;
    }
}
