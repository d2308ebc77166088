//! SQL Server Engine Implementation
//!
//! Implements [`Connector`] and [`SessionPool`] for Microsoft SQL Server using
//! `tiberius` (TDS) pooled by `bb8`.
//!
//! # Implementation Notes
//! - At most 10 physical connections per pool, none kept warm, idle ones reaped after 30s
//! - Acquiring a connection is bounded by `connectionTimeoutMs`
//! - Each request is bounded by `requestTimeoutMs` via `tokio::time::timeout`; expiry is `ETIMEOUT`
//! - `@name` placeholders are rewritten to tiberius' positional `@P1..@Pn`
//! - Date/time cells become ISO-8601 text, GUIDs text, binary Base64
//! - Driver failures become [`RawFault`]: server errors keep their number,
//!   transport errors get a named code (`ETIMEOUT`, `ECONNRESET`, ...)

use async_trait::async_trait;
use base64::Engine as _;
use bb8::{Pool, RunError};
use bb8_tiberius::ConnectionManager;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use regex::{Captures, Regex};
use serde_json::Value;
use std::io::ErrorKind as IoErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tiberius::{AuthMethod, ColumnData, Config, EncryptionLevel, Query};
use tracing::debug;
use uuid::Uuid;

use crate::engine::{Connector, ConnectionConfig, QueryParam, Recordset, Row, SessionPool, SqlType};
use crate::error::RawFault;

type MssqlPool = Pool<ConnectionManager>;

const MAX_POOL_SIZE: u32 = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens tiberius-backed session pools
#[derive(Debug, Default, Clone, Copy)]
pub struct TiberiusConnector;

#[async_trait]
impl Connector for TiberiusConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn SessionPool>, RawFault> {
        let pool = MssqlSessionPool::connect(config).await?;
        Ok(Arc::new(pool))
    }
}

/// A bb8 pool of tiberius clients for one database
pub struct MssqlSessionPool {
    /// `None` once closed
    pool: Mutex<Option<MssqlPool>>,
    request_timeout: Duration,
}

impl MssqlSessionPool {
    /// Build the pool and probe one physical connection
    ///
    /// The probe makes login and network failures surface here rather than at
    /// the first query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, RawFault> {
        let manager = ConnectionManager::new(build_config(config));

        let pool = Pool::builder()
            .max_size(MAX_POOL_SIZE)
            .min_idle(None)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .reaper_rate(POOL_IDLE_TIMEOUT)
            .connection_timeout(config.connection_timeout())
            .retry_connection(false)
            .build(manager)
            .await
            .map_err(fault_from_manager)?;

        {
            let mut conn = pool.get().await.map_err(fault_from_pool)?;
            let stream = conn.simple_query("SELECT 1").await.map_err(fault_from_tiberius)?;
            stream.into_results().await.map_err(fault_from_tiberius)?;
        }

        debug!(server = %config.server, database = ?config.database, "SQL Server pool established");

        Ok(Self {
            pool: Mutex::new(Some(pool)),
            request_timeout: config.request_timeout(),
        })
    }

    fn pool(&self) -> Result<MssqlPool, RawFault> {
        self.pool.lock().clone().ok_or_else(RawFault::not_connected)
    }

    async fn run(&self, sql: &str, params: &[QueryParam]) -> Result<Recordset, RawFault> {
        let pool = self.pool()?;

        let request = async {
            let mut conn = pool.get().await.map_err(fault_from_pool)?;

            let stream = if params.is_empty() {
                conn.simple_query(sql).await.map_err(fault_from_tiberius)?
            } else {
                let mut query = Query::new(rewrite_placeholders(sql, params)?);
                for param in params {
                    coerce_param(param)?.bind_to(&mut query);
                }
                query.query(&mut *conn).await.map_err(fault_from_tiberius)?
            };

            let rows = stream.into_first_result().await.map_err(fault_from_tiberius)?;
            Ok::<_, RawFault>(Recordset::from_rows(rows.iter().map(convert_row).collect()))
        };

        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RawFault::with_code(
                "ETIMEOUT",
                format!("Request timed out after {}ms", self.request_timeout.as_millis()),
            )),
        }
    }
}

#[async_trait]
impl SessionPool for MssqlSessionPool {
    async fn simple_query(&self, sql: &str) -> Result<Recordset, RawFault> {
        self.run(sql, &[]).await
    }

    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Recordset, RawFault> {
        self.run(sql, params).await
    }

    async fn close(&self) -> Result<(), RawFault> {
        // Dropping the last handle closes idle connections; checked-out ones close on return
        self.pool.lock().take();
        Ok(())
    }
}

/// Build a tiberius Config from a `ConnectionConfig`
fn build_config(config: &ConnectionConfig) -> Config {
    let mut tib_config = Config::new();
    tib_config.host(&config.server);
    tib_config.port(config.port);
    tib_config.authentication(AuthMethod::sql_server(&config.user, &config.password));
    if let Some(db) = config.database.as_deref().filter(|d| !d.is_empty()) {
        tib_config.database(db);
    }
    tib_config.encryption(if config.encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::NotSupported
    });
    if config.trust_server_certificate {
        tib_config.trust_cert();
    }
    tib_config.application_name("tsql-warden");
    tib_config
}

// ============================================================================
// Fault Mapping
// ============================================================================

/// Named transport code for an IO failure
fn io_code(kind: IoErrorKind) -> &'static str {
    match kind {
        IoErrorKind::TimedOut => "ETIMEOUT",
        IoErrorKind::ConnectionReset => "ECONNRESET",
        IoErrorKind::ConnectionRefused => "ECONNREFUSED",
        IoErrorKind::ConnectionAborted
        | IoErrorKind::UnexpectedEof
        | IoErrorKind::BrokenPipe
        | IoErrorKind::NotConnected => "ECONNCLOSED",
        _ => "ESOCKET",
    }
}

fn fault_from_tiberius(err: tiberius::error::Error) -> RawFault {
    match err {
        tiberius::error::Error::Server(token) => {
            let number = i32::try_from(token.code()).unwrap_or(i32::MAX);
            RawFault::with_number(number, token.message())
        }
        tiberius::error::Error::Io { kind, message } => RawFault::with_code(io_code(kind), message),
        other => RawFault::new(other.to_string()),
    }
}

fn fault_from_manager(err: bb8_tiberius::Error) -> RawFault {
    match err {
        bb8_tiberius::Error::Tiberius(e) => fault_from_tiberius(e),
        bb8_tiberius::Error::Io(e) => RawFault::with_code(io_code(e.kind()), e.to_string()),
    }
}

fn fault_from_pool(err: RunError<bb8_tiberius::Error>) -> RawFault {
    match err {
        RunError::User(e) => fault_from_manager(e),
        RunError::TimedOut => {
            RawFault::with_code("ETIMEOUT", "Timed out waiting for a pooled connection")
        }
    }
}

// ============================================================================
// Parameter Binding
// ============================================================================

/// Rewrite `@name` placeholders to positional `@P<n>` in parameter order
///
/// Matching is case-insensitive and whole-word; `@@SERVERNAME`-style globals
/// are left alone.
pub fn rewrite_placeholders(sql: &str, params: &[QueryParam]) -> Result<String, RawFault> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let names: Vec<String> = params.iter().map(|p| regex::escape(p.bare_name())).collect();
    let pattern = format!(r"(?i)(^|[^@\w])@({})\b", names.join("|"));
    let re = Regex::new(&pattern)
        .map_err(|e| RawFault::new(format!("Invalid parameter name: {e}")))?;

    Ok(re
        .replace_all(sql, |caps: &Captures<'_>| {
            let name = &caps[2];
            let position = params
                .iter()
                .position(|p| p.bare_name().eq_ignore_ascii_case(name))
                .unwrap_or_default();
            format!("{}@P{}", &caps[1], position + 1)
        })
        .into_owned())
}

/// A parameter value converted to a concrete bind type
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Text(Option<String>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Bit(Option<bool>),
    Float(Option<f64>),
    DateTime(Option<NaiveDateTime>),
    Guid(Option<Uuid>),
}

impl BoundValue {
    fn bind_to(self, query: &mut Query<'_>) {
        match self {
            Self::Text(v) => query.bind(v),
            Self::Int(v) => query.bind(v),
            Self::BigInt(v) => query.bind(v),
            Self::Bit(v) => query.bind(v),
            Self::Float(v) => query.bind(v),
            Self::DateTime(v) => query.bind(v),
            Self::Guid(v) => query.bind(v),
        }
    }
}

fn infer_type(value: &Value) -> SqlType {
    match value {
        Value::Bool(_) => SqlType::Bit,
        Value::Number(n) if n.is_i64() || n.is_u64() => SqlType::BigInt,
        Value::Number(_) => SqlType::Float,
        _ => SqlType::NVarChar,
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Convert a parameter's JSON value to its bind type
///
/// Without a type hint the type is inferred from the JSON value. Arrays and
/// objects bind as their JSON text.
pub fn coerce_param(param: &QueryParam) -> Result<BoundValue, RawFault> {
    let value = &param.value;
    let sql_type = param.sql_type.unwrap_or_else(|| infer_type(value));
    let invalid = || {
        RawFault::new(format!(
            "Invalid value for parameter @{}: expected {sql_type:?}",
            param.bare_name()
        ))
    };

    let bound = match sql_type {
        SqlType::NVarChar | SqlType::VarChar => BoundValue::Text(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        SqlType::Int => BoundValue::Int(match value {
            Value::Null => None,
            v => Some(v.as_i64().and_then(|i| i32::try_from(i).ok()).ok_or_else(invalid)?),
        }),
        SqlType::BigInt => BoundValue::BigInt(match value {
            Value::Null => None,
            v => Some(v.as_i64().ok_or_else(invalid)?),
        }),
        SqlType::Bit => BoundValue::Bit(match value {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            v => match v.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => return Err(invalid()),
            },
        }),
        SqlType::Float => BoundValue::Float(match value {
            Value::Null => None,
            v => Some(v.as_f64().ok_or_else(invalid)?),
        }),
        SqlType::DateTime => BoundValue::DateTime(match value {
            Value::Null => None,
            v => Some(v.as_str().and_then(parse_datetime).ok_or_else(invalid)?),
        }),
        SqlType::UniqueIdentifier => BoundValue::Guid(match value {
            Value::Null => None,
            v => Some(v.as_str().and_then(|s| Uuid::parse_str(s).ok()).ok_or_else(invalid)?),
        }),
    };

    Ok(bound)
}

// ============================================================================
// Type Conversion
// ============================================================================

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Convert a non-temporal cell to JSON
fn convert_column_data(data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::from(*v),
        ColumnData::I16(Some(v)) => Value::from(*v),
        ColumnData::I32(Some(v)) => Value::from(*v),
        ColumnData::I64(Some(v)) => Value::from(*v),
        ColumnData::F32(Some(v)) => float_value(f64::from(*v)),
        ColumnData::F64(Some(v)) => float_value(*v),
        ColumnData::Numeric(Some(n)) => {
            #[allow(clippy::cast_precision_loss)]
            let val = n.value() as f64 / 10f64.powi(i32::from(n.scale()));
            float_value(val)
        }
        ColumnData::String(Some(s)) => Value::String(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::String(g.to_string()),
        ColumnData::Binary(Some(b)) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        ColumnData::Xml(Some(xml)) => Value::String(xml.clone().into_owned().into_string()),
        _ => Value::Null,
    }
}

/// Convert a tiberius row, reading date/time cells through chrono
fn convert_row(row: &tiberius::Row) -> Row {
    row.cells()
        .enumerate()
        .map(|(i, (column, data))| {
            let value = match data {
                ColumnData::DateTime(Some(_))
                | ColumnData::SmallDateTime(Some(_))
                | ColumnData::DateTime2(Some(_)) => row
                    .try_get::<NaiveDateTime, _>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |dt| {
                        Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
                    }),
                ColumnData::DateTimeOffset(Some(_)) => row
                    .try_get::<DateTime<Utc>, _>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |dt| Value::String(dt.to_rfc3339())),
                ColumnData::Date(Some(_)) => row
                    .try_get::<NaiveDate, _>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string())),
                ColumnData::Time(Some(_)) => row
                    .try_get::<NaiveTime, _>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |t| Value::String(t.format("%H:%M:%S%.f").to_string())),
                _ => convert_column_data(data),
            };
            (column.name().to_string(), value)
        })
        .collect()
}
