//! Error Handling Infrastructure
//!
//! This module defines the error taxonomy used throughout tsql-warden.
//! Every user-facing failure is a [`WardenError`] of exactly one [`ErrorKind`];
//! the kind decides the stable code and the remediation suggestions.
//!
//! # Error Kinds
//! - `Connection`: The server could not be reached or refused the login
//! - `Validation`: Malformed identifiers, rejected SQL, out-of-range limits, bad config
//! - `Security`: Operations blocked by the read-only policy
//! - `Query`: The server rejected or failed the query
//! - `Timeout`: The server took too long
//! - `Permission`: The login lacks privileges
//! - `Unknown`: No fault information was available
//!
//! Raw driver failures cross into the crate as [`RawFault`] and are turned into
//! taxonomy errors by [`crate::classifier::classify`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Connection,
    Validation,
    Security,
    Query,
    Timeout,
    Permission,
    Unknown,
}

impl ErrorKind {
    /// Stable error code string for JSON output
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection => "CONNECTION_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Security => "SECURITY_ERROR",
            Self::Query => "QUERY_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::Permission => "PERMISSION_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Driver code attached to an error detail: a server error number or a named transport code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FaultCode {
    Number(i32),
    Name(String),
}

/// Structured detail kept alongside a classified error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Message reported by the driver before classification
    #[serde(rename = "originalError", skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<FaultCode>,
}

/// Main error type for tsql-warden operations
///
/// A single tagged value: the kind discriminant, a human message, and optional
/// driver detail. The `Display` output is the message alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WardenError {
    kind: ErrorKind,
    message: String,
    detail: Option<ErrorDetail>,
}

impl WardenError {
    /// Create an error of an arbitrary kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a security error
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create a permission error
    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    /// Create an unknown error
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attach driver detail
    #[must_use]
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Append text to the message, keeping kind and detail
    #[must_use]
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.message.push_str(suffix);
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        self.kind.code()
    }

    /// Human-readable message (agent-appropriate, no credentials)
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn detail(&self) -> Option<&ErrorDetail> {
        self.detail.as_ref()
    }
}

/// Raw failure reported by the database driver
///
/// Any field may be absent. `number` is the server error number (e.g. 18456),
/// `code` a named transport code (e.g. `ETIMEOUT`).
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{message}")]
pub struct RawFault {
    pub code: Option<String>,
    pub number: Option<i32>,
    pub message: String,
}

impl RawFault {
    /// Fault carrying only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            number: None,
            message: message.into(),
        }
    }

    /// Fault carrying a named transport code
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            number: None,
            message: message.into(),
        }
    }

    /// Fault carrying a server error number
    pub fn with_number(number: i32, message: impl Into<String>) -> Self {
        Self {
            code: None,
            number: Some(number),
            message: message.into(),
        }
    }

    /// Fault raised when a query is issued before `connect`
    pub fn not_connected() -> Self {
        Self::with_code("ENOTOPEN", "Database connection not established")
    }

    /// Detail payload preserving this fault's message and code
    #[must_use]
    pub fn detail(&self) -> ErrorDetail {
        let code = match (self.number, &self.code) {
            (Some(number), _) => Some(FaultCode::Number(number)),
            (None, Some(name)) => Some(FaultCode::Name(name.clone())),
            (None, None) => None,
        };
        ErrorDetail {
            original_error: Some(self.message.clone()),
            code,
        }
    }
}

/// Result type alias for tsql-warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
