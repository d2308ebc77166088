//! Query Validation for Read-Only Operations
//!
//! This module implements the read-only gate every query passes before it
//! reaches a connection. tsql-warden never executes write, DDL, or procedure calls.
//!
//! # Validation Strategy
//! Checks run in a fixed order on the trimmed, uppercased text (inspection only;
//! the original casing is what gets executed):
//! 1. Empty input
//! 2. Leading statement must be one of `SELECT, WITH, SHOW, DESCRIBE, EXPLAIN`
//! 3. Forbidden keywords as whole words (`create_date` is fine, `CREATE` is not)
//! 4. Forbidden procedure prefixes `SP_` / `XP_` anywhere
//! 5. Injection patterns (comments, stacked statements, `UNION ... SELECT`, quoted tautologies)
//!
//! The first failing check decides the error text.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Result, WardenError};

/// Statements a query may start with
pub const ALLOWED_STATEMENTS: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN"];

/// Keywords rejected wherever they appear as whole words
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "EXEC",
    "EXECUTE",
    "OPENROWSET",
    "OPENDATASOURCE",
    "BULK",
    "MERGE",
    "GRANT",
    "REVOKE",
    "DENY",
];

/// Stored/extended procedure prefixes, rejected even mid-identifier
pub const FORBIDDEN_PREFIXES: &[&str] = &["SP_", "XP_"];

static FORBIDDEN_KEYWORD_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"\b{kw}\b")).unwrap()))
        .collect()
});

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"--", // line comment
        r"/\*", // block comment
        r"(?s);.*SELECT", // stacked statement
        r"(?s)UNION.*SELECT", // union injection
        r"(?s)'\s*OR\s*'.*'", // quoted OR tautology
        r"(?s)'\s*AND\s*'.*'", // quoted AND tautology
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static EXISTING_TOP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bTOP[\s(]").unwrap());

static LEADING_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\s*SELECT\s+(?:(?:DISTINCT|ALL)\s+)?)").unwrap());

/// Outcome of query validation
///
/// Validation never fails as a `Result`; the caller decides whether to reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }

    /// Convert into a `Result`, rejecting with a Validation-kind error
    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(WardenError::validation(format!(
                "Query validation failed: {}",
                self.error.unwrap_or_default()
            )))
        }
    }
}

/// Validate that a query is a permitted read-only statement
#[must_use]
pub fn validate_query(sql: &str) -> ValidationResult {
    let normalized = sql.trim().to_uppercase();

    if normalized.is_empty() {
        return ValidationResult::invalid("Empty query not allowed");
    }

    if !ALLOWED_STATEMENTS.iter().any(|stmt| normalized.starts_with(stmt)) {
        return ValidationResult::invalid(format!(
            "Query must start with one of: {}",
            ALLOWED_STATEMENTS.join(", ")
        ));
    }

    for (keyword, pattern) in FORBIDDEN_KEYWORD_PATTERNS.iter() {
        if pattern.is_match(&normalized) {
            return ValidationResult::invalid(format!("Forbidden keyword detected: {keyword}"));
        }
    }

    for prefix in FORBIDDEN_PREFIXES {
        if normalized.contains(prefix) {
            return ValidationResult::invalid(format!("Forbidden keyword detected: {prefix}"));
        }
    }

    if contains_injection_pattern(&normalized) {
        return ValidationResult::invalid("Potential SQL injection pattern detected");
    }

    ValidationResult::valid()
}

fn contains_injection_pattern(normalized: &str) -> bool {
    INJECTION_PATTERNS.iter().any(|p| p.is_match(normalized))
}

/// Normalize query text for execution
///
/// Trims, collapses whitespace runs (tabs and newlines included) to one space,
/// and drops the trailing statement terminator. A run of terminators such as
/// `;;` is stripped whole, so applying it twice changes nothing.
#[must_use]
pub fn sanitize_query(sql: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(sql.trim(), " ");
    let mut sanitized = collapsed.as_ref();
    while let Some(stripped) = sanitized.strip_suffix(';') {
        sanitized = stripped.trim_end();
    }
    sanitized.to_string()
}

/// Insert a `TOP n` row cap after the leading `SELECT`
///
/// Queries that already carry a `TOP` clause come back unchanged. This is a
/// textual rewrite: only `SELECT`-leading queries are capped, so CTE (`WITH ...`)
/// queries pass through uncapped.
#[must_use]
pub fn add_row_limit(sql: &str, max_rows: u32) -> String {
    let normalized = sql.trim().to_uppercase();
    if EXISTING_TOP.is_match(&normalized) {
        return sql.to_string();
    }

    LEADING_SELECT.replace(sql, format!("${{1}}TOP {max_rows} ")).into_owned()
}

/// Full pre-flight pipeline: validate, sanitize, cap
///
/// Fails with a Validation-kind error before any connection is touched.
pub fn prepare_query(sql: &str, max_rows: u32) -> Result<String> {
    validate_query(sql).into_result()?;
    let sanitized = sanitize_query(sql);
    Ok(add_row_limit(&sanitized, max_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn error_of(sql: &str) -> String {
        validate_query(sql).error.unwrap_or_default()
    }

    // Allow-list tests

    #[test]
    fn test_empty_query() {
        assert_eq!(error_of(""), "Empty query not allowed");
        assert_eq!(error_of("   \n\t "), "Empty query not allowed");
    }

    #[test]
    fn test_allowed_leading_statements() {
        assert!(validate_query("SELECT * FROM Users").is_valid);
        assert!(validate_query("select name from sys.tables").is_valid);
        assert!(validate_query("  WITH cte AS (SELECT 1 AS n) SELECT n FROM cte").is_valid);
        assert!(validate_query("SHOW TABLES").is_valid);
        assert!(validate_query("DESCRIBE Users").is_valid);
        assert!(validate_query("EXPLAIN SELECT 1").is_valid);
    }

    #[test]
    fn test_disallowed_leading_statement() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "drop table Users",
            "hello world",
            "123",
            "DECLARE @x INT",
        ] {
            let err = error_of(sql);
            assert_eq!(err, "Query must start with one of: SELECT, WITH, SHOW, DESCRIBE, EXPLAIN");
        }
    }

    // Forbidden keyword tests

    #[test]
    fn test_forbidden_keywords_whole_word() {
        assert_eq!(
            error_of("SELECT * FROM Users; DROP TABLE Users"),
            "Forbidden keyword detected: DROP"
        );
        assert_eq!(
            error_of("WITH x AS (SELECT 1 AS a) DELETE FROM Users"),
            "Forbidden keyword detected: DELETE"
        );
        assert_eq!(
            error_of("SELECT * INTO #t FROM Users EXEC('x')"),
            "Forbidden keyword detected: EXEC"
        );
        assert_eq!(
            error_of("SELECT * FROM OPENROWSET('SQLNCLI', 'x', 'y')"),
            "Forbidden keyword detected: OPENROWSET"
        );
        assert_eq!(error_of("select 1 where 1 = 1 merge"), "Forbidden keyword detected: MERGE");
    }

    #[test]
    fn test_keyword_order_is_fixed() {
        // INSERT is checked before DROP
        assert_eq!(
            error_of("SELECT 1 DROP INSERT"),
            "Forbidden keyword detected: INSERT"
        );
    }

    #[test]
    fn test_no_false_positive_on_substrings() {
        assert!(validate_query("SELECT create_date FROM sys.databases").is_valid);
        assert!(validate_query("SELECT is_deleted FROM Items").is_valid);
        assert!(validate_query("SELECT updated_at, executor_id FROM Jobs").is_valid);
        assert!(validate_query("SELECT droplet FROM Weather").is_valid);
    }

    // Forbidden prefix tests

    #[test]
    fn test_forbidden_prefixes() {
        assert_eq!(error_of("SELECT * FROM sp_who"), "Forbidden keyword detected: SP_");
        assert_eq!(error_of("SELECT * FROM XP_CMDSHELL"), "Forbidden keyword detected: XP_");
        // Caught mid-identifier as well
        assert_eq!(error_of("SELECT * FROM dbo.myxp_table"), "Forbidden keyword detected: XP_");
    }

    // Injection pattern tests

    #[test]
    fn test_injection_patterns() {
        let injection = "Potential SQL injection pattern detected";
        assert_eq!(error_of("SELECT * FROM Users -- comment"), injection);
        assert_eq!(error_of("SELECT * /* hidden */ FROM Users"), injection);
        assert_eq!(error_of("SELECT 1; SELECT 2"), injection);
        assert_eq!(error_of("SELECT name FROM a UNION SELECT password FROM b"), injection);
        assert_eq!(error_of("SELECT name FROM a UNION ALL SELECT name FROM b"), injection);
        assert_eq!(error_of("SELECT * FROM Users WHERE name = '' OR '1'='1'"), injection);
        assert_eq!(error_of("SELECT * FROM Users WHERE name = 'a' AND 'b'='b'"), injection);
    }

    #[test]
    fn test_injection_patterns_span_lines() {
        let injection = "Potential SQL injection pattern detected";
        assert_eq!(error_of("SELECT 1;\nSELECT 2"), injection);
        assert_eq!(
            error_of("SELECT name FROM Users;\r\n\tSELECT password_hash FROM Secrets"),
            injection
        );
        assert_eq!(error_of("SELECT name FROM a UNION\nSELECT password FROM b"), injection);

        let stacked = "SELECT name FROM Users;\nSELECT password_hash FROM Secrets";
        assert!(prepare_query(stacked, 5).is_err());
    }

    #[test]
    fn test_trailing_semicolon_is_not_stacking() {
        assert!(validate_query("SELECT * FROM Users;").is_valid);
    }

    #[test]
    fn test_validation_result_into_result() {
        let err = validate_query("DELETE FROM Users").into_result().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(err.message().starts_with("Query validation failed: Query must start with one of"));
        assert!(validate_query("SELECT 1").into_result().is_ok());
    }

    // Sanitize tests

    #[test]
    fn test_sanitize_collapses_whitespace_and_semicolon() {
        assert_eq!(sanitize_query("SELECT  *  FROM   Users;"), "SELECT * FROM Users");
        assert_eq!(sanitize_query("\n\tSELECT *\n\tFROM Users\n"), "SELECT * FROM Users");
        assert_eq!(sanitize_query("SELECT 1 ;"), "SELECT 1");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for sql in [
            "SELECT  *  FROM   Users;",
            "SELECT 1 ; ",
            "  select\n\n1  ",
            "SELECT ';' AS s",
        ] {
            let once = sanitize_query(sql);
            assert_eq!(sanitize_query(&once), once);
        }
    }

    #[test]
    fn test_sanitize_strips_terminator_run() {
        assert_eq!(sanitize_query("SELECT 1;;"), "SELECT 1");
        assert_eq!(sanitize_query("SELECT 1; ;"), "SELECT 1");
        assert_eq!(sanitize_query(&sanitize_query("SELECT 1;;")), "SELECT 1");
    }

    #[test]
    fn test_sanitize_keeps_inner_semicolons() {
        insta::assert_snapshot!(sanitize_query("SELECT ';' AS s;"), @"SELECT ';' AS s");
    }

    // Row limit tests

    #[test]
    fn test_add_row_limit() {
        assert_eq!(add_row_limit("SELECT * FROM Users", 100), "SELECT TOP 100 * FROM Users");
        assert_eq!(add_row_limit("select name from t", 5), "select TOP 5 name from t");
        assert_eq!(add_row_limit("  SELECT 1", 10), "  SELECT TOP 10 1");
    }

    #[test]
    fn test_add_row_limit_is_noop_with_top() {
        let capped = add_row_limit("SELECT * FROM Users", 100);
        assert_eq!(add_row_limit(&capped, 50), capped);
        assert_eq!(add_row_limit("SELECT TOP(5) * FROM t", 10), "SELECT TOP(5) * FROM t");
    }

    #[test]
    fn test_add_row_limit_after_distinct() {
        assert_eq!(
            add_row_limit("SELECT DISTINCT name FROM t", 10),
            "SELECT DISTINCT TOP 10 name FROM t"
        );
    }

    #[test]
    fn test_add_row_limit_leaves_cte_uncapped() {
        let cte = "WITH cte AS (SELECT 1 AS n) SELECT n FROM cte";
        assert_eq!(add_row_limit(cte, 10), cte);
    }

    #[test]
    fn test_prepare_query_pipeline() {
        assert_eq!(
            prepare_query("SELECT  *\nFROM Users;", 1000).unwrap(),
            "SELECT TOP 1000 * FROM Users"
        );
        let err = prepare_query("UPDATE Users SET a = 1", 1000).unwrap_err();
        assert!(err.message().contains("Query must start with one of"));
    }
}
