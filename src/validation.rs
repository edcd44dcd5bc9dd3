use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{BenchDbError, Result};

/// Names owned by the store itself.
pub const RESERVED_NAMES: &[&str] = &["hash", "value", "local", "filename", "features"];

/// Prefix of internal tables (translators and the like).
pub const RESERVED_PREFIX: &str = "__";

/// Longest accepted feature name.
pub const MAX_NAME_LENGTH: usize = 64;

static SQLITE_KEYWORDS: &[&str] = &[
    "abort", "action", "add", "after", "all", "alter", "always", "analyze", "and", "as", "asc",
    "attach", "autoincrement", "before", "begin", "between", "by", "cascade", "case", "cast",
    "check", "collate", "column", "commit", "conflict", "constraint", "create", "cross", "current",
    "current_date", "current_time", "current_timestamp", "database", "default", "deferrable",
    "deferred", "delete", "desc", "detach", "distinct", "do", "drop", "each", "else", "end",
    "escape", "except", "exclude", "exclusive", "exists", "explain", "fail", "filter", "first",
    "following", "for", "foreign", "from", "full", "generated", "glob", "group", "groups",
    "having", "if", "ignore", "immediate", "in", "index", "indexed", "initially", "inner",
    "insert", "instead", "intersect", "into", "is", "isnull", "join", "key", "last", "left",
    "like", "limit", "match", "materialized", "natural", "no", "not", "nothing", "notnull",
    "null", "nulls", "of", "offset", "on", "or", "order", "others", "outer", "over", "partition",
    "plan", "pragma", "preceding", "primary", "query", "raise", "range", "recursive",
    "references", "regexp", "reindex", "release", "rename", "replace", "restrict", "returning",
    "right", "rollback", "row", "rows", "savepoint", "select", "set", "table", "temp",
    "temporary", "then", "ties", "to", "transaction", "trigger", "unbounded", "union", "unique",
    "update", "using", "vacuum", "values", "view", "virtual", "when", "where", "window", "with",
    "without",
];

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("static regex is valid"));

static NON_IDENTIFIER_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static regex is valid"));

/// Validation utilities for names that end up inside generated SQL
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a user supplied feature name.
    ///
    /// Rejects names that are too short, reserved by the store, reserved by
    /// SQLite (case-insensitive) or not shaped like an identifier.
    pub fn validate_feature_name(name: &str) -> Result<()> {
        Self::validate_identifier(name)?;

        if name.len() < 2 {
            return Err(BenchDbError::schema(format!("Feature name '{name}' is too short")));
        }

        let lower = name.to_lowercase();
        if RESERVED_NAMES.contains(&lower.as_str()) || name.starts_with(RESERVED_PREFIX) {
            return Err(BenchDbError::schema(format!("Feature name '{name}' is reserved")));
        }

        Self::reject_sqlite_names(name)
    }

    /// Validate a name introduced by an extractor or the store itself.
    ///
    /// Store-owned names such as `local` pass; SQLite keywords do not, since
    /// the name becomes a bare column or table identifier.
    pub fn validate_column_name(name: &str) -> Result<()> {
        Self::validate_identifier(name)?;
        Self::reject_sqlite_names(name)
    }

    fn reject_sqlite_names(name: &str) -> Result<()> {
        let lower = name.to_lowercase();
        if SQLITE_KEYWORDS.contains(&lower.as_str()) || lower.starts_with("sqlite_") {
            return Err(BenchDbError::schema(format!(
                "Feature name '{name}' is reserved by sqlite"
            )));
        }
        Ok(())
    }

    /// Validate the identifier shape only; applied even to internally created features.
    pub fn validate_identifier(name: &str) -> Result<()> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(BenchDbError::schema(format!(
                "Feature name '{name}' is too long (max {MAX_NAME_LENGTH} characters)"
            )));
        }

        if !IDENTIFIER.is_match(name) {
            return Err(BenchDbError::schema(format!(
                "Feature name '{name}' must match [a-zA-Z][a-zA-Z0-9_]*"
            )));
        }

        Ok(())
    }

    /// Whether `name` has the shape accepted for group names on the command line.
    #[must_use]
    pub fn is_identifier(name: &str) -> bool {
        IDENTIFIER.is_match(name)
    }

    /// Replace every run of non-alphanumeric characters with an underscore.
    #[must_use]
    pub fn sanitize_identifier(raw: &str) -> String {
        NON_IDENTIFIER_CHARS.replace_all(raw, "_").into_owned()
    }

    /// Derive a database name from its file path.
    #[must_use]
    pub fn dbname_from_path(path: &Path) -> String {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        filename
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_rejected() {
        assert!(InputValidator::validate_feature_name("a").is_err());
        assert!(InputValidator::validate_feature_name("ab").is_ok());
    }

    #[test]
    fn test_sqlite_keywords_case_insensitive() {
        assert!(InputValidator::validate_feature_name("SELECT").is_err());
        assert!(InputValidator::validate_feature_name("Table").is_err());
        assert!(InputValidator::validate_feature_name("sqlite_stat").is_err());
    }

    #[test]
    fn test_column_names_allow_store_names_but_not_keywords() {
        assert!(InputValidator::validate_column_name("local").is_ok());
        assert!(InputValidator::validate_column_name("kis_local").is_ok());
        assert!(InputValidator::validate_column_name("order").is_err());
        assert!(InputValidator::validate_column_name("Index").is_err());
    }

    #[test]
    fn test_dbname_from_path() {
        assert_eq!(InputValidator::dbname_from_path(Path::new("/x/meta-2.db")), "meta_2_db");
    }

    #[test]
    fn test_sanitize_collapses_runs() {
        assert_eq!(InputValidator::sanitize_identifier("solve time (s)"), "solve_time_s_");
    }
}
