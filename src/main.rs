//! tsql-warden CLI Entry Point
//!
//! Runs the MCP server (the default) or a single tool from the command line:
//! - `mcp` - MCP server over stdio
//! - `test-connection`, `databases`, `server-info` - server checks
//! - `tables`, `views`, `describe`, `foreign-keys`, `stats` - catalog queries
//! - `query` - validated read-only query
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tsql_warden::config::{self, ConfigLayer};
use tsql_warden::engine::mssql::TiberiusConnector;
use tsql_warden::tools::{call_tool, Tool};
use tsql_warden::{
    mcp, ConnectionManager, ErrorEnvelope, Metadata, QueryExecutor, SuccessEnvelope, WardenError,
};

/// tsql-warden - Read-only SQL Server access for agents
#[derive(Parser)]
#[command(name = "tsql-warden")]
#[command(about = "Read-only SQL Server gateway for LLM tool callers")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// JSON config file (defaults to the per-user config if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ConnectionArgs {
    /// SQL Server host name
    #[arg(long, env = "SQLSERVER_HOST", global = true)]
    server: Option<String>,

    /// Default database
    #[arg(long, env = "SQLSERVER_DATABASE", global = true)]
    database: Option<String>,

    #[arg(long, env = "SQLSERVER_USER", global = true)]
    user: Option<String>,

    #[arg(long, env = "SQLSERVER_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[arg(long, env = "SQLSERVER_PORT", global = true)]
    port: Option<u16>,

    #[arg(long, env = "SQLSERVER_ENCRYPT", global = true)]
    encrypt: Option<bool>,

    #[arg(long, env = "SQLSERVER_TRUST_CERT", global = true)]
    trust_server_certificate: Option<bool>,

    /// Connection timeout in milliseconds
    #[arg(long, env = "SQLSERVER_CONNECTION_TIMEOUT", global = true)]
    connection_timeout: Option<u64>,

    /// Request timeout in milliseconds
    #[arg(long, env = "SQLSERVER_REQUEST_TIMEOUT", global = true)]
    request_timeout: Option<u64>,

    /// Default row cap for queries
    #[arg(long, env = "SQLSERVER_MAX_ROWS", global = true)]
    max_rows: Option<u32>,

    /// Idle time in milliseconds before a non-default database pool is closed
    #[arg(long, env = "SQLSERVER_IDLE_TIMEOUT", global = true)]
    idle_timeout: Option<u64>,
}

impl ConnectionArgs {
    fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            server: self.server,
            database: self.database,
            user: self.user,
            password: self.password,
            password_env: None,
            port: self.port,
            encrypt: self.encrypt,
            trust_server_certificate: self.trust_server_certificate,
            connection_timeout_ms: self.connection_timeout,
            request_timeout_ms: self.request_timeout,
            max_rows: self.max_rows,
            idle_timeout_ms: self.idle_timeout,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio (default)
    Mcp,

    /// Check connectivity and report server details
    TestConnection {
        #[arg(long)]
        target_database: Option<String>,
    },

    /// List online databases
    Databases,

    /// List base tables
    Tables {
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        target_database: Option<String>,
    },

    /// List views
    Views {
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        target_database: Option<String>,
    },

    /// Describe the columns of a table
    Describe {
        table: String,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        target_database: Option<String>,
    },

    /// Execute a read-only query
    Query {
        sql: String,
        /// Row cap (1-10000)
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        target_database: Option<String>,
    },

    /// List foreign key relationships
    ForeignKeys {
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        target_database: Option<String>,
    },

    /// Report server version and edition
    ServerInfo,

    /// Report table row counts and sizes
    Stats {
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        target_database: Option<String>,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::TestConnection { .. } => "test-connection",
            Self::Databases => "databases",
            Self::Tables { .. } => "tables",
            Self::Views { .. } => "views",
            Self::Describe { .. } => "describe",
            Self::Query { .. } => "query",
            Self::ForeignKeys { .. } => "foreign-keys",
            Self::ServerInfo => "server-info",
            Self::Stats { .. } => "stats",
        }
    }

    /// Tool and JSON arguments this subcommand runs
    fn into_tool_call(self) -> Option<(Tool, Value)> {
        let call = match self {
            Self::Mcp => return None,
            Self::TestConnection { target_database } => {
                (Tool::TestConnection, json!({ "database": target_database }))
            }
            Self::Databases => (Tool::ListDatabases, json!({})),
            Self::Tables { schema, target_database } => {
                (Tool::ListTables, json!({ "schema": schema, "database": target_database }))
            }
            Self::Views { schema, target_database } => {
                (Tool::ListViews, json!({ "schema": schema, "database": target_database }))
            }
            Self::Describe { table, schema, target_database } => (
                Tool::DescribeTable,
                json!({ "table_name": table, "schema": schema, "database": target_database }),
            ),
            Self::Query { sql, limit, target_database } => (
                Tool::ExecuteQuery,
                json!({ "query": sql, "limit": limit, "database": target_database }),
            ),
            Self::ForeignKeys { table, schema, target_database } => (
                Tool::GetForeignKeys,
                json!({ "table_name": table, "schema": schema, "database": target_database }),
            ),
            Self::ServerInfo => (Tool::GetServerInfo, json!({})),
            Self::Stats { table, schema, target_database } => (
                Tool::GetTableStats,
                json!({ "table_name": table, "schema": schema, "database": target_database }),
            ),
        };
        Some(call)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "Failed to serialize output"),
    }
}

fn fail(command: &str, err: &WardenError) -> ExitCode {
    emit(&ErrorEnvelope::from_error(command, err));
    ExitCode::FAILURE
}

/// Row count for list-shaped results and query results
fn rows_returned(data: &Value) -> Option<usize> {
    match data {
        Value::Array(rows) => Some(rows.len()),
        Value::Object(map) => {
            map.get("rowCount").and_then(Value::as_u64).and_then(|n| usize::try_from(n).ok())
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Mcp);
    let command_name = command.name();

    let settings = match config::resolve(cli.connection.into_layer(), cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return fail(command_name, &e),
    };

    let manager = ConnectionManager::new(
        settings.connection,
        settings.idle_timeout,
        Arc::new(TiberiusConnector),
    );
    let executor = QueryExecutor::new(manager);

    let Some((tool, args)) = command.into_tool_call() else {
        return match mcp::serve(executor).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "MCP server failed");
                ExitCode::FAILURE
            }
        };
    };

    let start = Instant::now();
    let result = call_tool(&executor, tool.name(), &args).await;
    executor.shutdown().await;
    let execution_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(data) => {
            let meta = match rows_returned(&data) {
                Some(rows) => Metadata::with_rows(execution_ms, rows),
                None => Metadata::new(execution_ms),
            };
            emit(&SuccessEnvelope::new(command_name, data, meta));
            ExitCode::SUCCESS
        }
        Err(e) => fail(command_name, &e),
    }
}
