//! Configuration Management
//!
//! This module resolves the SQL Server connection settings from layered sources.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>` (must exist)
//! - Global: `<config_dir>/tsql-warden/config.json` (optional, per-user)
//!
//! # Resolution Precedence
//! 1. CLI flags (highest priority)
//! 2. Environment variables (`SQLSERVER_*`, read by clap alongside the flags)
//! 3. Config file
//! 4. Built-in defaults
//!
//! # Secrets
//! A config file may name `passwordEnv` instead of storing a password. The
//! variable is read at load time; a missing variable is a configuration error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::ConnectionConfig;
use crate::error::{Result, WardenError};
use crate::pool::DEFAULT_IDLE_TIMEOUT;
use crate::validation::MAX_ROW_LIMIT;

/// One layer of optional settings (file, environment, or CLI)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name for password (if not storing password directly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_server_certificate: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

impl ConfigLayer {
    /// Fill every unset field of `self` from `lower`
    #[must_use]
    pub fn overlay(self, lower: Self) -> Self {
        Self {
            server: self.server.or(lower.server),
            database: self.database.or(lower.database),
            user: self.user.or(lower.user),
            password: self.password.or(lower.password),
            password_env: self.password_env.or(lower.password_env),
            port: self.port.or(lower.port),
            encrypt: self.encrypt.or(lower.encrypt),
            trust_server_certificate: self
                .trust_server_certificate
                .or(lower.trust_server_certificate),
            connection_timeout_ms: self.connection_timeout_ms.or(lower.connection_timeout_ms),
            request_timeout_ms: self.request_timeout_ms.or(lower.request_timeout_ms),
            max_rows: self.max_rows.or(lower.max_rows),
            idle_timeout_ms: self.idle_timeout_ms.or(lower.idle_timeout_ms),
        }
    }

    /// Replace `passwordEnv` with the variable's value
    ///
    /// A literal password in the same layer wins.
    pub fn resolve_password_env(mut self) -> Result<Self> {
        if let Some(env_var) = self.password_env.take() {
            if self.password.is_none() {
                match std::env::var(&env_var) {
                    Ok(password) => self.password = Some(password),
                    Err(_) => {
                        return Err(WardenError::validation(format!(
                            "Environment variable {env_var} not found for password"
                        )));
                    }
                }
            }
        }
        Ok(self)
    }

    /// Apply defaults and validate
    pub fn into_settings(self) -> Result<Settings> {
        let server = required(
            self.server,
            "SQL Server host is required (set SQLSERVER_HOST or --server)",
        )?;
        let user = required(
            self.user,
            "SQL Server user is required (set SQLSERVER_USER or --user)",
        )?;
        let password = required(
            self.password,
            "SQL Server password is required (set SQLSERVER_PASSWORD or --password)",
        )?;

        let mut connection = ConnectionConfig::new(server, user, password);
        connection.database = self.database.filter(|db| !db.is_empty());

        if let Some(port) = self.port {
            if port == 0 {
                return Err(WardenError::validation("Port must be between 1 and 65535"));
            }
            connection.port = port;
        }
        if let Some(encrypt) = self.encrypt {
            connection.encrypt = encrypt;
        }
        if let Some(trust) = self.trust_server_certificate {
            connection.trust_server_certificate = trust;
        }
        if let Some(ms) = self.connection_timeout_ms {
            connection.connection_timeout_ms = non_zero(ms, "Connection timeout")?;
        }
        if let Some(ms) = self.request_timeout_ms {
            connection.request_timeout_ms = non_zero(ms, "Request timeout")?;
        }
        if let Some(max_rows) = self.max_rows {
            if max_rows == 0 || max_rows > MAX_ROW_LIMIT {
                return Err(WardenError::validation(format!(
                    "Max rows must be between 1 and {MAX_ROW_LIMIT}"
                )));
            }
            connection.max_rows = max_rows;
        }

        let idle_timeout = match self.idle_timeout_ms {
            Some(ms) => Duration::from_millis(non_zero(ms, "Idle timeout")?),
            None => DEFAULT_IDLE_TIMEOUT,
        };

        Ok(Settings {
            connection,
            idle_timeout,
        })
    }
}

fn required(value: Option<String>, message: &str) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| WardenError::validation(message))
}

fn non_zero(ms: u64, label: &str) -> Result<u64> {
    if ms == 0 {
        return Err(WardenError::validation(format!("{label} must be greater than 0 ms")));
    }
    Ok(ms)
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub connection: ConnectionConfig,
    /// Idle time before a non-default pool is closed
    pub idle_timeout: Duration,
}

/// Get path to global config file (`<config_dir>/tsql-warden/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| WardenError::validation("Could not determine user config directory"))?;

    Ok(config_dir.join("tsql-warden").join("config.json"))
}

/// Load one config file layer
///
/// A missing file yields an empty layer unless `required` is set.
pub fn load_file(path: &Path, required: bool) -> Result<ConfigLayer> {
    if !path.exists() {
        if required {
            return Err(WardenError::validation(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(ConfigLayer::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| WardenError::validation(format!("Could not read config file: {e}")))?;

    serde_json::from_str::<ConfigLayer>(&contents)
        .map_err(|e| WardenError::validation(format!("Invalid config file format: {e}")))
}

/// Resolve settings from CLI/environment values and a config file
///
/// `config_path` is the explicit `--config` path; without it the global file
/// is read if present.
pub fn resolve(overrides: ConfigLayer, config_path: Option<&Path>) -> Result<Settings> {
    let file = match config_path {
        Some(path) => load_file(path, true)?,
        None => match global_config_path() {
            Ok(path) => load_file(&path, false)?,
            Err(_) => ConfigLayer::default(),
        },
    };

    overrides.resolve_password_env()?.overlay(file.resolve_password_env()?).into_settings()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn minimal() -> ConfigLayer {
        ConfigLayer {
            server: Some("db.local".into()),
            user: Some("reader".into()),
            password: Some("pw".into()),
            ..Default::default()
        }
    }

    fn minimal_with(edit: impl FnOnce(&mut ConfigLayer)) -> ConfigLayer {
        let mut layer = minimal();
        edit(&mut layer);
        layer
    }

    fn accepts(layer: ConfigLayer) -> bool {
        layer.into_settings().is_ok()
    }

    #[test]
    fn test_defaults_applied() {
        let settings = minimal().into_settings().unwrap();
        assert_eq!(settings.connection, ConnectionConfig::new("db.local", "reader", "pw"));
        assert_eq!(settings.idle_timeout, Duration::from_millis(300_000));
    }

    #[test]
    fn test_overlay_precedence() {
        let cli = ConfigLayer {
            port: Some(1444),
            ..Default::default()
        };
        let file = minimal_with(|l| {
            l.port = Some(2000);
            l.max_rows = Some(50);
        });

        let settings = cli.overlay(file).into_settings().unwrap();
        assert_eq!(settings.connection.port, 1444);
        assert_eq!(settings.connection.max_rows, 50);
        assert_eq!(settings.connection.server, "db.local");
    }

    #[test]
    fn test_required_fields() {
        let err = minimal_with(|l| l.server = None).into_settings().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("SQLSERVER_HOST"));

        let err = minimal_with(|l| l.password = Some(String::new()))
            .into_settings()
            .unwrap_err();
        assert!(err.message().contains("password is required"));
    }

    #[test]
    fn test_bounds() {
        assert!(!accepts(minimal_with(|l| l.max_rows = Some(0))));
        assert!(!accepts(minimal_with(|l| l.max_rows = Some(10_001))));
        assert!(accepts(minimal_with(|l| l.max_rows = Some(10_000))));
        assert!(!accepts(minimal_with(|l| l.port = Some(0))));
        assert!(!accepts(minimal_with(|l| l.request_timeout_ms = Some(0))));
        assert!(!accepts(minimal_with(|l| l.idle_timeout_ms = Some(0))));
    }

    #[test]
    fn test_empty_database_is_default() {
        let settings = minimal_with(|l| l.database = Some(String::new()))
            .into_settings()
            .unwrap();
        assert!(settings.connection.database.is_none());
    }

    #[test]
    fn test_password_env_resolved() {
        std::env::set_var("TSQL_WARDEN_TEST_PASSWORD", "secret");

        let layer = ConfigLayer {
            password: None,
            password_env: Some("TSQL_WARDEN_TEST_PASSWORD".into()),
            ..minimal()
        };
        let layer = layer.resolve_password_env().unwrap();
        assert_eq!(layer.password.as_deref(), Some("secret"));
        assert!(layer.password_env.is_none());

        std::env::remove_var("TSQL_WARDEN_TEST_PASSWORD");
    }

    #[test]
    fn test_password_env_missing() {
        let layer = ConfigLayer {
            password: None,
            password_env: Some("TSQL_WARDEN_TEST_MISSING_VAR".into()),
            ..minimal()
        };
        let err = layer.resolve_password_env().unwrap_err();
        assert!(err.message().contains("TSQL_WARDEN_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_file_layer_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("tsql_warden_config_{}.json", std::process::id()));
        let contents = serde_json::json!({
            "server": "sql01",
            "user": "ro",
            "password": "x",
            "trustServerCertificate": false,
            "idleTimeoutMs": 1000,
        });
        fs::write(&path, contents.to_string()).unwrap();

        let settings = resolve(ConfigLayer::default(), Some(&path)).unwrap();
        assert_eq!(settings.connection.server, "sql01");
        assert!(!settings.connection.trust_server_certificate);
        assert_eq!(settings.idle_timeout, Duration::from_secs(1));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let path = std::env::temp_dir().join("tsql_warden_does_not_exist.json");
        let err = load_file(&path, true).unwrap_err();
        assert!(err.message().contains("Config file not found"));
        assert_eq!(load_file(&path, false).unwrap(), ConfigLayer::default());
    }

    #[test]
    fn test_invalid_file_format() {
        let path =
            std::env::temp_dir().join(format!("tsql_warden_bad_{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        let err = load_file(&path, true).unwrap_err();
        assert!(err.message().contains("Invalid config file format"));
        fs::remove_file(&path).unwrap();
    }
}
