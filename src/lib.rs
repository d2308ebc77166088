//! tsql-warden - Read-Only SQL Server Gateway
//!
//! tsql-warden exposes a SQL Server instance to LLM tool callers through a
//! fixed set of catalog and query tools. Every query is validated as a single
//! read-only statement, sanitized, and row-capped before it reaches a
//! connection.
//!
//! # Core Principles
//! - Read-only by construction (allow-list of statement kinds, deny-list of keywords)
//! - Caller values are bound parameters, never spliced into SQL
//! - One long-lived pool per database, idle pools reclaimed
//! - Transient connection faults retried with quadratic backoff
//! - Driver faults classified into a small, stable error taxonomy
//!
//! # Module Organization
//! - [`error`] - Error taxonomy and raw driver faults
//! - [`classifier`] - Fault classification and user-facing reports
//! - [`security`] - Query validation, sanitization and row capping
//! - [`validation`] - Identifier, limit and tool parameter validation
//! - [`engine`] - Driver seam and the SQL Server driver
//! - [`connection`] - Retrying connection
//! - [`pool`] - Per-database connection manager
//! - [`executor`] - Validated query execution
//! - [`tools`] - Tool catalog
//! - [`config`] - Configuration resolution
//! - [`mcp`] - MCP server (JSON-RPC 2.0 over stdio)
//! - [`output`] - JSON output envelopes for the CLI

pub mod classifier;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod executor;
pub mod mcp;
pub mod output;
pub mod pool;
pub mod security;
pub mod tools;
pub mod validation;

// Re-export commonly used types for convenience
pub use classifier::{classify, describe, ErrorReport};
pub use config::{ConfigLayer, Settings};
pub use connection::{Connection, RetryPolicy, RetryingConnection};
pub use engine::{ConnectionConfig, Connector, QueryParam, Recordset, Row, SessionPool, SqlType};
pub use error::{ErrorDetail, ErrorKind, RawFault, Result, WardenError};
pub use executor::QueryExecutor;
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use pool::ConnectionManager;
pub use security::{add_row_limit, prepare_query, sanitize_query, validate_query, ValidationResult};
pub use validation::escape_identifier;
