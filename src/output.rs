//! JSON Output Envelope Types
//!
//! This module defines the structured JSON output format for all CLI commands.
//! Every command prints either a `SuccessEnvelope` or an `ErrorEnvelope`.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {...}}` where `error` carries
//!   `code`, `message` and `suggestions`
//!
//! Output is stable and suitable for programmatic parsing by agents.

use serde::{Deserialize, Serialize};

use crate::classifier::describe;
use crate::error::WardenError;

/// Success envelope for command results
///
/// Generic over the data type to support different command return values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (query, tables, describe, ...)
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self {
            ok: true,
            command: command.into(),
            data,
            meta,
        }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            command: command.into(),
            error,
        }
    }

    /// Create error envelope from a `WardenError`, suggestions included
    pub fn from_error(command: impl Into<String>, err: &WardenError) -> Self {
        let report = describe(err);
        Self::new(
            command,
            ErrorInfo {
                code: report.code,
                message: report.error,
                suggestions: report.suggestions,
            },
        )
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "VALIDATION_ERROR", "CONNECTION_ERROR")
    pub code: String,

    /// Human-readable error message (agent-appropriate, no sensitive data)
    pub message: String,

    /// Remediation hints for the error kind (may be empty)
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            suggestions: Vec::new(),
        }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub execution_ms: u64,

    /// Number of rows returned (for row results, None for other commands)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    pub const fn new(execution_ms: u64) -> Self {
        Self {
            execution_ms,
            rows_returned: None,
        }
    }

    pub const fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self {
            execution_ms,
            rows_returned: Some(rows_returned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "query",
            serde_json::json!({"result": "test"}),
            Metadata::with_rows(42, 10),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""command":"query"#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""rows_returned":10"#));
    }

    #[test]
    fn test_error_envelope_serialization() {
        let envelope =
            ErrorEnvelope::new("tables", ErrorInfo::new("CONNECTION_ERROR", "Could not connect"));

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":false"#));
        assert!(json.contains(r#""command":"tables"#));
        assert!(json.contains(r#""code":"CONNECTION_ERROR"#));
        assert!(json.contains(r#""message":"Could not connect"#));
        assert!(json.contains(r#""suggestions":[]"#));
    }

    #[test]
    fn test_error_envelope_from_warden_error() {
        let err =
            WardenError::validation("Query validation failed: Forbidden keyword detected: DROP");
        let envelope = ErrorEnvelope::from_error("query", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.command, "query");
        assert_eq!(envelope.error.code, "VALIDATION_ERROR");
        assert!(envelope.error.message.contains("DROP"));
        assert!(!envelope.error.suggestions.is_empty());
    }

    #[test]
    fn test_metadata_without_rows() {
        let json = serde_json::to_string(&Metadata::new(100)).unwrap();

        assert!(json.contains(r#""execution_ms":100"#));
        // rows_returned should be omitted when None
        assert!(!json.contains("rows_returned"));
    }
}
