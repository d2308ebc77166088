//! Catalog and Query Tools
//!
//! The nine read-only operations offered to tool callers. Each tool:
//! 1. Checks its JSON arguments against declarative field rules (all problems reported at once)
//! 2. Validates identifiers
//! 3. Fills a fixed query template, passing caller values as bound parameters
//! 4. Runs it through [`QueryExecutor`], which validates and caps the final SQL
//!
//! Tool input schemas are generated from the argument structs with `schemars`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

use crate::connection::Connection;
use crate::engine::QueryParam;
use crate::error::{Result, WardenError};
use crate::executor::QueryExecutor;
use crate::validation::{
    escape_identifier, validate_foreign_key_parameters, validate_list_tables_parameters,
    validate_optional_database, validate_parameters, validate_query_parameters,
    validate_table_description_parameters, FieldRule, MAX_QUERY_LENGTH,
};

// ============================================================================
// Tool Arguments
// ============================================================================

/// Arguments of tools that only target a database
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DatabaseArgs {
    /// Target database name (optional, uses default if not specified)
    pub database: Option<String>,
}

/// Arguments of `list_tables` and `list_views`
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SchemaFilterArgs {
    /// Schema name to filter by (optional)
    pub schema: Option<String>,
    /// Target database name (optional, uses default if not specified)
    pub database: Option<String>,
}

/// Arguments of `describe_table`
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DescribeTableArgs {
    /// Name of the table to describe
    pub table_name: Option<String>,
    /// Schema name (defaults to dbo)
    pub schema: Option<String>,
    /// Target database name (optional, uses default if not specified)
    pub database: Option<String>,
}

/// Arguments of `execute_query`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryArgs {
    /// SQL SELECT query to execute (read-only operations only)
    pub query: String,
    /// Maximum number of rows to return (1-10000, optional)
    #[schemars(range(min = 1, max = 10000))]
    pub limit: Option<i64>,
    /// Target database name (optional, uses default if not specified)
    pub database: Option<String>,
}

/// Arguments of `get_foreign_keys` and `get_table_stats`
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct TableFilterArgs {
    /// Table name to filter by (optional)
    pub table_name: Option<String>,
    /// Schema name (defaults to dbo)
    pub schema: Option<String>,
    /// Target database name (optional, uses default if not specified)
    pub database: Option<String>,
}

/// Arguments of tools that take none
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

const DATABASE_RULE: FieldRule = FieldRule::string("database");
const SCHEMA_RULE: FieldRule = FieldRule::string("schema");
const TABLE_NAME_RULE: FieldRule = FieldRule::string("table_name");
const SCHEMA_FILTER_RULES: [FieldRule; 2] = [SCHEMA_RULE, DATABASE_RULE];
const TABLE_FILTER_RULES: [FieldRule; 3] = [TABLE_NAME_RULE, SCHEMA_RULE, DATABASE_RULE];

// ============================================================================
// Tool Registry
// ============================================================================

/// Every tool this server offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    TestConnection,
    ListDatabases,
    ListTables,
    ListViews,
    DescribeTable,
    ExecuteQuery,
    GetForeignKeys,
    GetServerInfo,
    GetTableStats,
}

impl Tool {
    pub const ALL: [Self; 9] = [
        Self::TestConnection,
        Self::ListDatabases,
        Self::ListTables,
        Self::ListViews,
        Self::DescribeTable,
        Self::ExecuteQuery,
        Self::GetForeignKeys,
        Self::GetServerInfo,
        Self::GetTableStats,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TestConnection => "test_connection",
            Self::ListDatabases => "list_databases",
            Self::ListTables => "list_tables",
            Self::ListViews => "list_views",
            Self::DescribeTable => "describe_table",
            Self::ExecuteQuery => "execute_query",
            Self::GetForeignKeys => "get_foreign_keys",
            Self::GetServerInfo => "get_server_info",
            Self::GetTableStats => "get_table_stats",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::TestConnection => "Test the SQL Server connection and validate permissions",
            Self::ListDatabases => "List all online databases on the SQL Server instance",
            Self::ListTables => "List all base tables, optionally filtered by schema",
            Self::ListViews => {
                "List all views with their definitions, optionally filtered by schema"
            }
            Self::DescribeTable => {
                "Get the column definitions of a table (types, nullability, defaults, precision)"
            }
            Self::ExecuteQuery => {
                "Execute a read-only SELECT query against the database. Write, DDL and procedure \
                 calls are rejected before reaching the server; results are capped by a TOP clause."
            }
            Self::GetForeignKeys => "Get foreign key relationships, optionally for a single table",
            Self::GetServerInfo => "Get SQL Server name, version, product level and edition",
            Self::GetTableStats => "Get row counts and space usage for tables",
        }
    }

    /// JSON schema of the tool's arguments
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let schema = match self {
            Self::TestConnection => schemars::schema_for!(DatabaseArgs),
            Self::ListDatabases | Self::GetServerInfo => schemars::schema_for!(NoArgs),
            Self::ListTables | Self::ListViews => schemars::schema_for!(SchemaFilterArgs),
            Self::DescribeTable => schemars::schema_for!(DescribeTableArgs),
            Self::ExecuteQuery => schemars::schema_for!(ExecuteQueryArgs),
            Self::GetForeignKeys | Self::GetTableStats => schemars::schema_for!(TableFilterArgs),
        };

        let mut value = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
        if let Some(object) = value.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
            if matches!(self, Self::DescribeTable) {
                object.insert("required".to_string(), json!(["table_name"]));
            }
        }
        value
    }
}

/// Run the tool named `name` with JSON `args`
///
/// # Errors
/// Unknown tools and invalid arguments are Validation errors; execution
/// failures are classified.
pub async fn call_tool<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    name: &str,
    args: &Value,
) -> Result<Value> {
    let tool = Tool::from_name(name)
        .ok_or_else(|| WardenError::validation(format!("Unknown tool: {name}")))?;
    debug!(tool = tool.name(), "Calling tool");

    match tool {
        Tool::TestConnection => test_connection(executor, &parse(args, &[DATABASE_RULE])?).await,
        Tool::ListDatabases => list_databases(executor).await,
        Tool::ListTables => list_tables(executor, &parse(args, &SCHEMA_FILTER_RULES)?).await,
        Tool::ListViews => list_views(executor, &parse(args, &SCHEMA_FILTER_RULES)?).await,
        Tool::DescribeTable => describe_table(executor, &parse(args, &TABLE_FILTER_RULES)?).await,
        Tool::ExecuteQuery => {
            let rules = [
                FieldRule::string("query").required().length(1, MAX_QUERY_LENGTH).non_blank(),
                FieldRule::integer("limit").range(1, 10_000),
                DATABASE_RULE,
            ];
            execute_query(executor, &parse(args, &rules)?).await
        }
        Tool::GetForeignKeys => {
            get_foreign_keys(executor, &parse(args, &TABLE_FILTER_RULES)?).await
        }
        Tool::GetServerInfo => get_server_info(executor).await,
        Tool::GetTableStats => get_table_stats(executor, &parse(args, &TABLE_FILTER_RULES)?).await,
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: &Value, rules: &[FieldRule]) -> Result<T> {
    validate_parameters(args, rules)
}

fn rows_value(rows: Vec<crate::engine::Row>) -> Value {
    Value::Array(rows.into_iter().map(|row| Value::Object(row.into_iter().collect())).collect())
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Query Templates
// ============================================================================

const SERVER_DETAILS_SQL: &str = "SELECT @@SERVERNAME AS serverName, @@VERSION AS version, \
     SERVERPROPERTY('Edition') AS edition, DB_NAME() AS currentDatabase";

const SYSTEM_ACCESS_SQL: &str = "SELECT TOP 1 name FROM sys.databases";

const ENCRYPTION_SQL: &str =
    "SELECT encrypt_option FROM sys.dm_exec_connections WHERE session_id = @@SPID";

const LIST_DATABASES_SQL: &str =
    "SELECT database_id, name, create_date, collation_name, state_desc \
     FROM sys.databases WHERE state_desc = 'ONLINE' ORDER BY name";

const LIST_TABLES_SQL: &str =
    "SELECT TABLE_CATALOG AS table_catalog, TABLE_SCHEMA AS table_schema, \
     TABLE_NAME AS table_name, TABLE_TYPE AS table_type \
     FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'";

const LIST_VIEWS_SQL: &str =
    "SELECT TABLE_CATALOG AS table_catalog, TABLE_SCHEMA AS table_schema, \
     TABLE_NAME AS table_name, VIEW_DEFINITION AS view_definition, \
     CHECK_OPTION AS check_option, IS_UPDATABLE AS is_updatable \
     FROM INFORMATION_SCHEMA.VIEWS";

const DESCRIBE_TABLE_SQL: &str =
    "SELECT TABLE_CATALOG AS table_catalog, TABLE_SCHEMA AS table_schema, \
     TABLE_NAME AS table_name, COLUMN_NAME AS column_name, ORDINAL_POSITION AS ordinal_position, \
     COLUMN_DEFAULT AS column_default, IS_NULLABLE AS is_nullable, DATA_TYPE AS data_type, \
     CHARACTER_MAXIMUM_LENGTH AS character_maximum_length, \
     CHARACTER_OCTET_LENGTH AS character_octet_length, NUMERIC_PRECISION AS numeric_precision, \
     NUMERIC_PRECISION_RADIX AS numeric_precision_radix, NUMERIC_SCALE AS numeric_scale, \
     DATETIME_PRECISION AS datetime_precision \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_NAME = @tableName AND TABLE_SCHEMA = @schema \
     ORDER BY ORDINAL_POSITION";

const FOREIGN_KEYS_SQL: &str =
    "SELECT fk.name AS constraint_name, \
     OBJECT_SCHEMA_NAME(fk.parent_object_id) AS table_schema, \
     OBJECT_NAME(fk.parent_object_id) AS table_name, \
     COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS column_name, \
     OBJECT_SCHEMA_NAME(fk.referenced_object_id) AS referenced_table_schema, \
     OBJECT_NAME(fk.referenced_object_id) AS referenced_table_name, \
     COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS referenced_column_name \
     FROM sys.foreign_keys fk \
     INNER JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id";

const SERVER_INFO_SQL: &str =
    "SELECT @@SERVERNAME AS server_name, @@VERSION AS product_version, \
     SERVERPROPERTY('ProductLevel') AS product_level, SERVERPROPERTY('Edition') AS edition, \
     SERVERPROPERTY('EngineEdition') AS engine_edition";

const TABLE_STATS_SQL: &str =
    "SELECT s.name AS table_schema, t.name AS table_name, p.rows AS row_count, \
     SUM(a.total_pages) * 8 AS total_size_kb, SUM(a.used_pages) * 8 AS data_size_kb, \
     (SUM(a.total_pages) - SUM(a.used_pages)) * 8 AS index_size_kb \
     FROM sys.tables t \
     INNER JOIN sys.indexes i ON t.object_id = i.object_id \
     INNER JOIN sys.partitions p ON i.object_id = p.object_id AND i.index_id = p.index_id \
     INNER JOIN sys.allocation_units a ON p.partition_id = a.container_id \
     LEFT OUTER JOIN sys.schemas s ON t.schema_id = s.schema_id \
     WHERE t.name NOT LIKE 'dt%' AND t.is_ms_shipped = 0 AND i.object_id > 255";

const TABLE_STATS_GROUPING: &str =
    " GROUP BY s.name, t.name, p.rows ORDER BY table_schema, table_name";

// ============================================================================
// Tool Implementations
// ============================================================================

/// Connection status probe; connectivity failures are reported, not raised
pub async fn test_connection<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &DatabaseArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let database = database.as_deref();
    let start = Instant::now();

    let connection = match executor.connected(database).await {
        Ok(connection) => connection,
        Err(err) => {
            return Ok(json!({
                "isConnected": false,
                "connectionTime": elapsed_ms(start),
                "error": err.message(),
            }));
        }
    };
    let connection_time = elapsed_ms(start);

    let mut result = json!({ "isConnected": true, "connectionTime": connection_time });

    match executor.execute_validated(SERVER_DETAILS_SQL, None, database).await {
        Ok(recordset) => {
            if let Some(info) = recordset.first() {
                result["serverInfo"] = json!({
                    "serverName": info.get("serverName"),
                    "version": info.get("version"),
                    "edition": info.get("edition"),
                });
                result["database"] = info.get("currentDatabase").cloned().unwrap_or(Value::Null);
            }
        }
        Err(err) => {
            result["error"] = json!(format!("Failed to get server info: {}", err.message()));
        }
    }

    let can_execute_queries = connection.test_connection().await;
    let has_system_access = executor
        .execute_validated(SYSTEM_ACCESS_SQL, None, database)
        .await
        .is_ok();
    let encryption_enabled = executor
        .execute_validated(ENCRYPTION_SQL, None, database)
        .await
        .ok()
        .and_then(|rs| rs.first().and_then(|row| row.get("encrypt_option").cloned()))
        .is_some_and(|v| v.as_str().is_some_and(|s| s.eq_ignore_ascii_case("TRUE")));

    result["details"] = json!({
        "canExecuteQueries": can_execute_queries,
        "hasSystemAccess": has_system_access,
        "encryptionEnabled": encryption_enabled,
    });

    Ok(result)
}

pub async fn list_databases<C: Connection + 'static>(executor: &QueryExecutor<C>) -> Result<Value> {
    let recordset = executor.execute_validated(LIST_DATABASES_SQL, None, None).await?;
    Ok(rows_value(recordset.rows))
}

pub async fn list_tables<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &SchemaFilterArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let schema = validate_list_tables_parameters(args.schema.as_deref())?;

    let mut sql = LIST_TABLES_SQL.to_string();
    let mut params = Vec::new();
    if let Some(schema) = schema {
        sql.push_str(" AND TABLE_SCHEMA = @schema");
        params.push(QueryParam::new("schema", schema));
    }
    sql.push_str(" ORDER BY TABLE_SCHEMA, TABLE_NAME");

    let recordset = executor
        .execute_validated_with_params(&sql, &params, database.as_deref())
        .await?;
    Ok(rows_value(recordset.rows))
}

pub async fn list_views<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &SchemaFilterArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let schema = validate_list_tables_parameters(args.schema.as_deref())?;

    let mut sql = LIST_VIEWS_SQL.to_string();
    let mut params = Vec::new();
    if let Some(schema) = schema {
        sql.push_str(" WHERE TABLE_SCHEMA = @schema");
        params.push(QueryParam::new("schema", schema));
    }
    sql.push_str(" ORDER BY TABLE_SCHEMA, TABLE_NAME");

    let recordset = executor
        .execute_validated_with_params(&sql, &params, database.as_deref())
        .await?;
    Ok(rows_value(recordset.rows))
}

pub async fn describe_table<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &DescribeTableArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let (table_name, schema) =
        validate_table_description_parameters(args.table_name.as_deref(), args.schema.as_deref())?;

    let params = [
        QueryParam::new("tableName", table_name),
        QueryParam::new("schema", schema),
    ];
    let recordset = executor
        .execute_validated_with_params(DESCRIBE_TABLE_SQL, &params, database.as_deref())
        .await?;
    Ok(rows_value(recordset.rows))
}

/// Free-form read-only query; failures carry the elapsed time
pub async fn execute_query<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &ExecuteQueryArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let limit = args.limit.map(Value::from);
    let params =
        validate_query_parameters(Some(&args.query), limit.as_ref(), executor.max_rows())?;

    let start = Instant::now();
    let recordset = executor
        .execute_validated(&params.query, Some(params.limit), database.as_deref())
        .await
        .map_err(|err| err.with_suffix(&format!(" (execution time: {}ms)", elapsed_ms(start))))?;
    let execution_time = elapsed_ms(start);

    let rows: Vec<Value> = recordset
        .rows
        .iter()
        .map(|row| {
            let cells = recordset
                .columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null));
            Value::Array(cells.collect())
        })
        .collect();

    Ok(json!({
        "columns": recordset.columns,
        "rows": rows,
        "rowCount": recordset.rows.len(),
        "executionTime": execution_time,
    }))
}

pub async fn get_foreign_keys<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &TableFilterArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let (table_name, schema) =
        validate_foreign_key_parameters(args.table_name.as_deref(), args.schema.as_deref())?;

    let mut sql = FOREIGN_KEYS_SQL.to_string();
    let mut params = Vec::new();
    // The schema filter only narrows a table lookup
    if let Some(table_name) = table_name {
        sql.push_str(
            " WHERE OBJECT_NAME(fk.parent_object_id) = @tableName \
             AND OBJECT_SCHEMA_NAME(fk.parent_object_id) = @schema",
        );
        params.push(QueryParam::new("tableName", table_name));
        params.push(QueryParam::new("schema", schema.unwrap_or_else(|| "dbo".to_string())));
    }
    sql.push_str(" ORDER BY table_schema, table_name, constraint_name");

    let recordset = executor
        .execute_validated_with_params(&sql, &params, database.as_deref())
        .await?;
    Ok(rows_value(recordset.rows))
}

pub async fn get_server_info<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
) -> Result<Value> {
    let recordset = executor.execute_validated(SERVER_INFO_SQL, None, None).await?;
    let first = recordset.rows.into_iter().next();
    Ok(first.map_or(Value::Null, |row| Value::Object(row.into_iter().collect())))
}

pub async fn get_table_stats<C: Connection + 'static>(
    executor: &QueryExecutor<C>,
    args: &TableFilterArgs,
) -> Result<Value> {
    let database = validate_optional_database(args.database.as_deref())?;
    let (table_name, schema) =
        validate_foreign_key_parameters(args.table_name.as_deref(), args.schema.as_deref())?;

    let mut sql = TABLE_STATS_SQL.to_string();
    let mut params = Vec::new();
    if let Some(table_name) = table_name {
        // OBJECT_ID resolves the bracket-quoted two-part name
        let schema = schema.unwrap_or_else(|| "dbo".to_string());
        let object_name = format!(
            "{}.{}",
            escape_identifier(&schema)?,
            escape_identifier(&table_name)?
        );
        sql.push_str(" AND t.object_id = OBJECT_ID(@objectName)");
        params.push(QueryParam::new("objectName", object_name));
    }
    sql.push_str(TABLE_STATS_GROUPING);

    let recordset = executor
        .execute_validated_with_params(&sql, &params, database.as_deref())
        .await?;
    Ok(rows_value(recordset.rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::validate_query;

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(Tool::from_name("drop_table"), None);
    }

    #[test]
    fn test_templates_pass_query_validation() {
        let templates = [
            SERVER_DETAILS_SQL,
            SYSTEM_ACCESS_SQL,
            ENCRYPTION_SQL,
            LIST_DATABASES_SQL,
            LIST_TABLES_SQL,
            LIST_VIEWS_SQL,
            DESCRIBE_TABLE_SQL,
            FOREIGN_KEYS_SQL,
            SERVER_INFO_SQL,
            TABLE_STATS_SQL,
        ];
        for sql in templates {
            let result = validate_query(sql);
            assert!(result.is_valid, "{sql}: {:?}", result.error);
        }
    }

    #[test]
    fn test_input_schemas() {
        let schema = Tool::DescribeTable.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["table_name"]));
        assert!(schema["properties"]["table_name"].is_object());
        assert!(schema.get("$schema").is_none());

        let schema = Tool::ExecuteQuery.input_schema();
        assert_eq!(schema["required"], json!(["query"]));
        assert!(schema["properties"]["limit"].is_object());

        let schema = Tool::ListDatabases.input_schema();
        assert_eq!(schema["type"], "object");
    }
}
