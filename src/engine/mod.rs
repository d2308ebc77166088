//! Database Engine Traits and Core Types
//!
//! This module defines the seam between the query pipeline and the SQL Server
//! driver. The driver opens a [`SessionPool`] through a [`Connector`]; everything
//! above it (retry, pooling per database, classification) is driver-agnostic.
//!
//! # Fault Boundary
//! Driver methods report failures as [`RawFault`]. Nothing at this layer
//! classifies errors; that happens once, in [`crate::classifier`].

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RawFault;

pub mod mssql;

const fn default_port() -> u16 {
    1433
}

const fn default_true() -> bool {
    true
}

const fn default_connection_timeout_ms() -> u64 {
    30_000
}

const fn default_request_timeout_ms() -> u64 {
    60_000
}

const fn default_max_rows() -> u32 {
    1_000
}

/// Connection configuration for a SQL Server target
///
/// Immutable once built. A copy with a different `database` targets another
/// database on the same server (see [`ConnectionConfig::with_database`]).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Hostname or address of the server
    pub server: String,

    /// Default database; the server's login default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub user: String,

    /// WARNING: Sensitive data, do not log or include in error messages
    pub password: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub encrypt: bool,

    #[serde(default = "default_true")]
    pub trust_server_certificate: bool,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Row cap applied when a caller gives none
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
}

impl ConnectionConfig {
    /// Create a config with every optional setting at its default
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: None,
            user: user.into(),
            password: password.into(),
            port: default_port(),
            encrypt: true,
            trust_server_certificate: true,
            connection_timeout_ms: default_connection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_rows: default_max_rows(),
        }
    }

    /// Copy of this config targeting `database`
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// Password is redacted so configs can appear in tracing fields
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("port", &self.port)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_rows", &self.max_rows)
            .finish()
    }
}

/// Declared SQL type of a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    NVarChar,
    VarChar,
    Int,
    BigInt,
    Bit,
    Float,
    DateTime,
    UniqueIdentifier,
}

/// One bound parameter of a parameterized query
///
/// `name` matches an `@name` placeholder in the query text (the `@` is optional here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
}

impl QueryParam {
    /// Parameter whose type is inferred from the JSON value
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sql_type: None,
        }
    }

    /// Parameter with an explicit SQL type
    pub fn typed(
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
        sql_type: SqlType,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sql_type: Some(sql_type),
        }
    }

    /// Name without a leading `@`
    #[must_use]
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches('@')
    }
}

/// One result row, column order preserved
pub type Row = IndexMap<String, serde_json::Value>;

/// Row set returned by a single executed query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recordset {
    /// Column names in result order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Recordset {
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
        Self { columns, rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// An established pool of physical connections to one database
///
/// Implementations must allow concurrent requests.
#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Execute SQL text with no parameters
    async fn simple_query(&self, sql: &str) -> Result<Recordset, RawFault>;

    /// Execute SQL text with bound `@name` parameters
    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Recordset, RawFault>;

    /// Release every physical connection
    async fn close(&self) -> Result<(), RawFault>;
}

/// Opens session pools for a connection config
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn SessionPool>, RawFault>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_config_defaults_from_json() {
        let raw = json!({"server": "db.local", "user": "reader", "password": "pw"});
        let config: ConnectionConfig = serde_json::from_value(raw).unwrap();

        assert_eq!(config, ConnectionConfig::new("db.local", "reader", "pw"));
        assert_eq!(config.port, 1433);
        assert!(config.encrypt);
        assert!(config.trust_server_certificate);
        assert_eq!(config.connection_timeout_ms, 30_000);
        assert_eq!(config.request_timeout_ms, 60_000);
        assert_eq!(config.max_rows, 1_000);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_config_camel_case_keys() {
        let config: ConnectionConfig = serde_json::from_value(json!({
            "server": "db", "user": "u", "password": "p",
            "trustServerCertificate": false, "requestTimeoutMs": 5000, "maxRows": 50
        }))
        .unwrap();
        assert!(!config.trust_server_certificate);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_rows, 50);
    }

    #[test]
    fn test_with_database_leaves_original() {
        let base = ConnectionConfig::new("db", "u", "p").with_database("master");
        let sales = base.clone().with_database("Sales");
        assert_eq!(base.database.as_deref(), Some("master"));
        assert_eq!(sales.database.as_deref(), Some("Sales"));
        assert_eq!(sales.server, base.server);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("db", "u", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_query_param_serialization() {
        let param = QueryParam::typed("@schema", "dbo", SqlType::NVarChar);
        assert_eq!(param.bare_name(), "schema");
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json, json!({"name": "@schema", "value": "dbo", "type": "NVarChar"}));

        let untyped = QueryParam::new("id", 5);
        assert!(!serde_json::to_string(&untyped).unwrap().contains("type"));
    }

    #[test]
    fn test_recordset_from_rows_keeps_column_order() {
        let mut row = Row::new();
        row.insert("zeta".into(), json!(1));
        row.insert("alpha".into(), json!(2));
        let set = Recordset::from_rows(vec![row]);
        assert_eq!(set.columns, vec!["zeta".to_string(), "alpha".to_string()]);
        assert_eq!(set.len(), 1);
        assert!(Recordset::default().first().is_none());
    }
}
