//! Driver Fault Classification
//!
//! Converts raw driver failures into the error taxonomy and attaches
//! remediation hints for the caller.
//!
//! # Classification Order
//! 1. No fault at all → `Unknown`
//! 2. Server error number → fixed table
//!    (18456, 2/53, -2, 208, 207, 262/229, 1205, 8152, 515, anything else)
//! 3. Named transport code → `Timeout` or `Connection`
//! 4. Message text heuristics (case-insensitive) → first matching rule, else `Query`

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RawFault, WardenError};

/// Classify a raw driver fault
///
/// Pure function: the same fault always yields the same error. The original
/// message and code are preserved in the error detail.
#[must_use]
pub fn classify(fault: Option<&RawFault>) -> WardenError {
    let Some(fault) = fault else {
        return WardenError::unknown("Unknown database error occurred");
    };

    let detail = fault.detail();
    let message = fault.message.as_str();

    if let Some(number) = fault.number {
        return classify_number(number, message).with_detail(detail);
    }

    if let Some(code) = fault.code.as_deref() {
        if let Some(err) = classify_named_code(code) {
            return err.with_detail(detail);
        }
    }

    classify_message(message).with_detail(detail)
}

fn classify_number(number: i32, message: &str) -> WardenError {
    match number {
        18456 => WardenError::connection("Authentication failed: Invalid username or password"),
        2 | 53 => WardenError::connection("Connection failed: Server not found or not accessible"),
        -2 => WardenError::timeout("Connection timeout: Server took too long to respond"),
        208 => WardenError::validation("Invalid table or object name specified"),
        207 => WardenError::validation("Invalid column name specified"),
        262 | 229 => WardenError::permission(
            "Permission denied: Insufficient privileges to access this resource",
        ),
        1205 => WardenError::query("Query failed due to deadlock - please retry"),
        8152 => WardenError::validation("Data too long for target column"),
        515 => WardenError::validation("Cannot insert null value into non-nullable column"),
        other => WardenError::query(format!("Database error ({other}): {message}")),
    }
}

fn classify_named_code(code: &str) -> Option<WardenError> {
    match code {
        "ETIMEOUT" => Some(WardenError::timeout("Operation timed out")),
        "ENOTOPEN" => Some(WardenError::connection("Database connection not established")),
        "ECONNCLOSED" | "ECONNRESET" | "ESOCKET" | "ECONNREFUSED" => Some(
            WardenError::connection("Connection failed: Server not found or network issue"),
        ),
        _ => None,
    }
}

fn classify_message(message: &str) -> WardenError {
    let lower = message.to_lowercase();

    if lower.contains("login failed") {
        WardenError::connection("Authentication failed: Invalid username or password")
    } else if lower.contains("server was not found") || lower.contains("network-related") {
        WardenError::connection("Connection failed: Server not found or network issue")
    } else if lower.contains("timeout") {
        WardenError::timeout("Operation timed out")
    } else if lower.contains("ssl") || lower.contains("certificate") {
        WardenError::connection(
            "SSL/Certificate error: Check encryption and certificate trust settings",
        )
    } else if lower.contains("permission") || lower.contains("denied") {
        WardenError::permission("Permission denied: Insufficient database privileges")
    } else {
        WardenError::query(format!("Database operation failed: {message}"))
    }
}

/// User-facing error report
///
/// Serialized as `{"error": ..., "code": ..., "suggestions": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
    pub code: String,
    pub suggestions: Vec<String>,
}

/// Build the user-facing report for a taxonomy error
#[must_use]
pub fn describe(err: &WardenError) -> ErrorReport {
    ErrorReport {
        error: err.message().to_string(),
        code: err.error_code().to_string(),
        suggestions: suggestions(err.kind()).iter().map(|s| (*s).to_string()).collect(),
    }
}

/// Fixed remediation hints per kind
#[must_use]
pub const fn suggestions(kind: ErrorKind) -> &'static [&'static str] {
    match kind {
        ErrorKind::Connection => &[
            "Verify server hostname and port number",
            "Check if SQL Server service is running",
            "Ensure network connectivity to the server",
            "Verify firewall settings allow SQL Server connections",
        ],
        ErrorKind::Validation => &[
            "Check spelling of table and column names",
            "Verify the object exists in the specified schema",
            "Ensure you have the correct database selected",
        ],
        ErrorKind::Security => &[
            "Only read-only SELECT queries are allowed",
            "Remove any INSERT, UPDATE, DELETE, or DDL statements",
            "Check for potentially dangerous keywords in your query",
        ],
        ErrorKind::Permission => &[
            "Contact your database administrator for access",
            "Verify you have SELECT permissions on the target tables",
            "Check if you need access to specific schemas or databases",
        ],
        ErrorKind::Timeout => &[
            "Try a simpler query with fewer rows",
            "Add WHERE clauses to limit the result set",
            "Check if the server is under heavy load",
        ],
        ErrorKind::Query => &[
            "Check your SQL syntax",
            "Verify all referenced tables and columns exist",
            "Try breaking complex queries into simpler parts",
        ],
        ErrorKind::Unknown => &[],
    }
}

impl From<RawFault> for WardenError {
    fn from(fault: RawFault) -> Self {
        classify(Some(&fault))
    }
}
