//! Unit tests for validation.rs module

use std::path::Path;

use benchdb::error::BenchDbError;
use benchdb::validation::{InputValidator, MAX_NAME_LENGTH, RESERVED_NAMES};
use proptest::prelude::*;

#[test]
fn test_validate_feature_name_valid() {
    for name in ["family", "clauses", "base_features_runtime", "v2"] {
        assert!(InputValidator::validate_feature_name(name).is_ok(), "rejected {name}");
    }
}

#[test]
fn test_validate_feature_name_too_short() {
    assert!(matches!(InputValidator::validate_feature_name("x"), Err(BenchDbError::Schema(_))));
}

#[test]
fn test_validate_feature_name_reserved() {
    for name in RESERVED_NAMES {
        assert!(InputValidator::validate_feature_name(name).is_err(), "accepted {name}");
        assert!(InputValidator::validate_feature_name(&name.to_uppercase()).is_err());
    }
}

#[test]
fn test_validate_feature_name_reserved_prefix() {
    assert!(InputValidator::validate_feature_name("__translator_cnf_kis").is_err());
}

#[test]
fn test_validate_feature_name_sqlite_keywords() {
    for name in ["select", "Table", "WHERE", "group"] {
        assert!(InputValidator::validate_feature_name(name).is_err(), "accepted {name}");
    }
    assert!(InputValidator::validate_feature_name("sqlite_master").is_err());
}

#[test]
fn test_validate_feature_name_shape() {
    for name in ["1abc", "a b", "a-b", "a;drop", "ä_feature", ""] {
        assert!(InputValidator::validate_feature_name(name).is_err(), "accepted {name:?}");
    }
}

#[test]
fn test_validate_feature_name_too_long() {
    let name = "a".repeat(MAX_NAME_LENGTH + 1);
    assert!(InputValidator::validate_feature_name(&name).is_err());
    let name = "a".repeat(MAX_NAME_LENGTH);
    assert!(InputValidator::validate_feature_name(&name).is_ok());
}

#[test]
fn test_validate_identifier_accepts_reserved() {
    assert!(InputValidator::validate_identifier("local").is_ok());
    assert!(InputValidator::validate_identifier("a").is_ok());
}

#[test]
fn test_sanitize_identifier() {
    assert_eq!(InputValidator::sanitize_identifier("run time (s)"), "run_time_s_");
    assert_eq!(InputValidator::sanitize_identifier("hash"), "hash");
}

#[test]
fn test_dbname_from_path() {
    assert_eq!(InputValidator::dbname_from_path(Path::new("/data/sancnf_meta.db")), "sancnf_meta_db");
    assert_eq!(InputValidator::dbname_from_path(Path::new("meta-data.csv")), "meta_data_csv");
}

proptest! {
    #[test]
    fn test_single_char_names_always_rejected(c in "[a-zA-Z]") {
        prop_assert!(InputValidator::validate_feature_name(&c).is_err());
    }

    #[test]
    fn test_double_underscore_prefix_always_rejected(rest in "[a-z0-9_]{0,20}") {
        let name = format!("__{rest}");
        prop_assert!(InputValidator::validate_feature_name(&name).is_err());
    }
}
