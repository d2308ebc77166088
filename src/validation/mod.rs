//! Identifier and Parameter Validation
//!
//! Untrusted tool arguments pass through here before any query template is
//! assembled.
//!
//! # Identifier Rules
//! - 1 to 128 characters
//! - `^[A-Za-z_][A-Za-z0-9_]*$`
//! - Table, schema, and database names must not be reserved words (case-insensitive);
//!   column names may be
//!
//! # Two Interpolation Paths
//! Identifiers compared against catalog values travel as bound parameters.
//! Identifiers that must appear in SQL text go through [`escape_identifier`].
//!
//! # Schema-Driven Validation
//! [`validate_parameters`] checks a JSON argument object against declarative
//! [`FieldRule`]s and reports every failing field in one message.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::{Result, WardenError};

/// Longest identifier SQL Server accepts
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Hard ceiling for any row cap
pub const MAX_ROW_LIMIT: u32 = 10_000;

/// Longest query text accepted from a caller
pub const MAX_QUERY_LENGTH: usize = 10_000;

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// SQL Server reserved words rejected as table, schema, or database names (subset)
const RESERVED_WORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "FROM",
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "ON", "AS", "ORDER", "BY", "GROUP",
    "HAVING", "UNION", "DISTINCT", "TOP", "NULL", "AND", "OR", "NOT", "IN", "LIKE", "BETWEEN",
    "EXISTS", "ALL", "ANY", "CASE", "WHEN", "THEN", "ELSE", "END", "IF", "WHILE", "BEGIN",
    "EXEC", "DECLARE", "SET", "PRINT", "RETURN", "FUNCTION", "PROCEDURE", "TRIGGER", "INDEX",
    "VIEW", "TABLE", "DATABASE", "SCHEMA", "USER", "ROLE", "GRANT", "REVOKE", "DENY", "PRIMARY",
    "FOREIGN", "KEY", "CONSTRAINT", "UNIQUE",
];

fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name))
}

/// Shared name rule; `label` prefixes every message ("Table name ...")
fn validate_name(name: &str, label: &str, reject_reserved: bool) -> Result<String> {
    if name.is_empty() {
        return Err(WardenError::validation(format!("{label} cannot be empty")));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(WardenError::validation(format!(
            "{label} cannot exceed {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }

    if !IDENTIFIER_PATTERN.is_match(name) {
        return Err(WardenError::validation(format!(
            "{label} must start with letter or underscore \
             and contain only letters, numbers, and underscores"
        )));
    }

    if reject_reserved && is_reserved_word(name) {
        return Err(WardenError::validation(format!("{label} cannot be a reserved word")));
    }

    Ok(name.to_string())
}

pub fn validate_table_name(name: &str) -> Result<String> {
    validate_name(name, "Table name", true)
}

pub fn validate_schema_name(name: &str) -> Result<String> {
    validate_name(name, "Schema name", true)
}

pub fn validate_column_name(name: &str) -> Result<String> {
    validate_name(name, "Column name", false)
}

pub fn validate_database_name(name: &str) -> Result<String> {
    validate_name(name, "Database name", true)
}

/// Validate a row cap: an integer in `1..=10000`
pub fn validate_row_limit(limit: i64) -> Result<u32> {
    if limit < 1 {
        return Err(WardenError::validation("Row limit must be at least 1"));
    }
    if limit > i64::from(MAX_ROW_LIMIT) {
        return Err(WardenError::validation("Row limit cannot exceed 10,000 for safety"));
    }
    // In range, so the conversion cannot fail
    u32::try_from(limit)
        .map_err(|_| WardenError::validation("Row limit cannot exceed 10,000 for safety"))
}

/// Validate a row cap taken from JSON, rejecting fractional numbers
pub fn parse_row_limit(value: &Value) -> Result<u32> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                validate_row_limit(i)
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()) {
                // Whole floats like 100.0; the clamp keeps the cast in range
                validate_row_limit(f.clamp(-1.0, f64::from(MAX_ROW_LIMIT) + 1.0) as i64)
            } else {
                Err(WardenError::validation("Row limit must be an integer"))
            }
        }
        _ => Err(WardenError::validation("Row limit must be an integer")),
    }
}

/// Bracket-quote an identifier for direct interpolation into SQL text
///
/// Existing brackets are stripped first: `[My]Table` becomes `[MyTable]`.
pub fn escape_identifier(identifier: &str) -> Result<String> {
    if identifier.is_empty() {
        return Err(WardenError::validation("Identifier must be a non-empty string"));
    }

    let cleaned: String = identifier.chars().filter(|c| *c != '[' && *c != ']').collect();

    if cleaned.is_empty() {
        return Err(WardenError::validation("Identifier cannot be empty after cleaning"));
    }

    if cleaned.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(WardenError::validation("Identifier cannot exceed 128 characters"));
    }

    Ok(format!("[{cleaned}]"))
}

// ============================================================================
// Schema-Driven Parameter Validation
// ============================================================================

/// Expected shape of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String {
        min_len: usize,
        max_len: usize,
        non_blank: bool,
    },
    Integer { min: i64, max: i64 },
    Boolean,
}

/// Declarative rule for one field, addressed by a dotted path
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub path: &'static str,
    pub required: bool,
    pub field_type: FieldType,
}

impl FieldRule {
    /// Optional string field with no length bounds
    #[must_use]
    pub const fn string(path: &'static str) -> Self {
        Self {
            path,
            required: false,
            field_type: FieldType::String {
                min_len: 0,
                max_len: usize::MAX,
                non_blank: false,
            },
        }
    }

    /// Optional integer field with no range bounds
    #[must_use]
    pub const fn integer(path: &'static str) -> Self {
        Self {
            path,
            required: false,
            field_type: FieldType::Integer {
                min: i64::MIN,
                max: i64::MAX,
            },
        }
    }

    #[must_use]
    pub const fn boolean(path: &'static str) -> Self {
        Self {
            path,
            required: false,
            field_type: FieldType::Boolean,
        }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Bound string length (in characters); ignored for non-strings
    #[must_use]
    pub const fn length(mut self, min: usize, max: usize) -> Self {
        if let FieldType::String { non_blank, .. } = self.field_type {
            self.field_type = FieldType::String {
                min_len: min,
                max_len: max,
                non_blank,
            };
        }
        self
    }

    #[must_use]
    pub const fn non_blank(mut self) -> Self {
        if let FieldType::String { min_len, max_len, .. } = self.field_type {
            self.field_type = FieldType::String {
                min_len,
                max_len,
                non_blank: true,
            };
        }
        self
    }

    /// Bound an integer's range; ignored for non-integers
    #[must_use]
    pub const fn range(mut self, min: i64, max: i64) -> Self {
        if let FieldType::Integer { .. } = self.field_type {
            self.field_type = FieldType::Integer { min, max };
        }
        self
    }

    /// Check this rule against `params`, pushing one message per problem
    fn check(&self, params: &Value, problems: &mut Vec<String>) {
        let value = lookup(params, self.path).filter(|v| !v.is_null());

        let Some(value) = value else {
            if self.required {
                problems.push(format!("{}: Required", self.path));
            }
            return;
        };

        match &self.field_type {
            FieldType::String { min_len, max_len, non_blank } => {
                let Some(s) = value.as_str() else {
                    problems.push(format!("{}: Expected string", self.path));
                    return;
                };
                let len = s.chars().count();
                if len < *min_len {
                    problems.push(format!(
                        "{}: Must contain at least {min_len} character(s)",
                        self.path
                    ));
                }
                if len > *max_len {
                    problems.push(format!(
                        "{}: Must contain at most {max_len} character(s)",
                        self.path
                    ));
                }
                if *non_blank && len > 0 && s.trim().is_empty() {
                    problems.push(format!("{}: Cannot be only whitespace", self.path));
                }
            }
            FieldType::Integer { min, max } => {
                let Some(i) = value.as_i64() else {
                    problems.push(format!("{}: Expected integer", self.path));
                    return;
                };
                if i < *min {
                    problems.push(format!("{}: Must be at least {min}", self.path));
                }
                if i > *max {
                    problems.push(format!("{}: Must be at most {max}", self.path));
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    problems.push(format!("{}: Expected boolean", self.path));
                }
            }
        }
    }
}

fn lookup<'a>(params: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(params, |current, segment| current.get(segment))
}

/// Validate `params` against `rules`, then deserialize into `T`
///
/// All rule violations are collected and reported together:
/// `Parameter validation failed: query: Required, limit: Must be at most 10000`.
pub fn validate_parameters<T: DeserializeOwned>(params: &Value, rules: &[FieldRule]) -> Result<T> {
    let mut problems = Vec::new();

    if !params.is_object() && !params.is_null() {
        problems.push("(root): Expected object".to_string());
    } else {
        for rule in rules {
            rule.check(params, &mut problems);
        }
    }

    if !problems.is_empty() {
        return Err(WardenError::validation(format!(
            "Parameter validation failed: {}",
            problems.join(", ")
        )));
    }

    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(params)
        .map_err(|e| WardenError::validation(format!("Parameter validation failed: {e}")))
}

// ============================================================================
// Per-Tool Parameter Helpers
// ============================================================================

/// Validated arguments of the free-form query tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters {
    pub query: String,
    pub limit: u32,
}

/// Validate free-form query arguments; `limit` falls back to `default_limit`
pub fn validate_query_parameters(
    query: Option<&str>,
    limit: Option<&Value>,
    default_limit: u32,
) -> Result<QueryParameters> {
    let query = query.ok_or_else(|| WardenError::validation("Query cannot be empty"))?;
    if query.is_empty() {
        return Err(WardenError::validation("Query cannot be empty"));
    }
    if query.chars().count() > MAX_QUERY_LENGTH {
        return Err(WardenError::validation("Query cannot exceed 10,000 characters"));
    }
    if query.trim().is_empty() {
        return Err(WardenError::validation("Query cannot be only whitespace"));
    }

    let limit = match limit.filter(|v| !v.is_null()) {
        Some(value) => parse_row_limit(value)?,
        None => default_limit,
    };

    Ok(QueryParameters {
        query: query.to_string(),
        limit,
    })
}

/// Validate `describe_table` arguments; schema defaults to `dbo`
pub fn validate_table_description_parameters(
    table_name: Option<&str>,
    schema: Option<&str>,
) -> Result<(String, String)> {
    let table_name = table_name
        .filter(|t| !t.is_empty())
        .ok_or_else(|| WardenError::validation("table_name parameter is required"))?;

    let schema = match schema.filter(|s| !s.is_empty()) {
        Some(s) => validate_schema_name(s)?,
        None => "dbo".to_string(),
    };

    Ok((validate_table_name(table_name)?, schema))
}

/// Validate optional table/schema filters (foreign keys, table stats)
pub fn validate_foreign_key_parameters(
    table_name: Option<&str>,
    schema: Option<&str>,
) -> Result<(Option<String>, Option<String>)> {
    let schema = schema.filter(|s| !s.is_empty()).map(validate_schema_name).transpose()?;
    let table_name = table_name.filter(|t| !t.is_empty()).map(validate_table_name).transpose()?;
    Ok((table_name, schema))
}

/// Validate the optional schema filter of listing tools
pub fn validate_list_tables_parameters(schema: Option<&str>) -> Result<Option<String>> {
    schema.filter(|s| !s.is_empty()).map(validate_schema_name).transpose()
}

/// Validate an optional target database name
pub fn validate_optional_database(database: Option<&str>) -> Result<Option<String>> {
    database.filter(|d| !d.is_empty()).map(validate_database_name).transpose()
}
