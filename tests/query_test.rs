//! Integration tests for filter compilation and execution

use benchdb::config::AppConfig;
use benchdb::error::BenchDbError;
use benchdb::query::{NameResolver, QueryBuilder};
use benchdb::BenchDb;
use proptest::prelude::*;
use tempfile::TempDir;

const COLUMNS: &[&str] = &["family", "author", "clauses", "sancnf_family", "kis_nodes"];

fn store(dir: &TempDir) -> BenchDb {
    let mut db = BenchDb::open(&[dir.path().join("query.db")], AppConfig::default()).unwrap();
    db.create_feature("tags", None).unwrap();
    db.create_feature("variables", Some("0")).unwrap();
    db.create_feature("clauses", None).unwrap();
    db.set_attribute("tags", "industrial", &["h1", "h2"], false).unwrap();
    db.set_attribute("tags", "random", &["h3"], false).unwrap();
    db.set_attribute("variables", "150", &["h1"], false).unwrap();
    db.set_attribute("variables", "50", &["h2"], false).unwrap();
    db.set_attribute("variables", "300", &["h3"], false).unwrap();
    db.set_attribute("clauses", "600", &["h1", "h3"], false).unwrap();
    db.set_attribute("clauses", "100", &["h2"], false).unwrap();
    db
}

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

#[test]
fn test_string_and_numeric_constraints() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);

    assert_eq!(sorted(db.hashes::<&str>(Some("tags = industrial"), &[]).unwrap()), vec!["h1", "h2"]);
    assert_eq!(sorted(db.hashes::<&str>(Some("variables > 100"), &[]).unwrap()), vec!["h1", "h3"]);
    assert_eq!(
        db.hashes::<&str>(Some("tags = industrial and variables > 100"), &[]).unwrap(),
        vec!["h1"]
    );
    assert_eq!(db.hashes::<&str>(Some("tags like %ndom"), &[]).unwrap(), vec!["h3"]);
    assert_eq!(db.hashes::<&str>(Some("tags unlike %ndom"), &[]).unwrap().len(), 2);
}

#[test]
fn test_numeric_comparison_is_not_lexicographic() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    // "50" > "300" as text
    assert_eq!(sorted(db.hashes::<&str>(Some("variables < 100"), &[]).unwrap()), vec!["h2"]);
    assert_eq!(sorted(db.hashes::<&str>(Some("(clauses / variables) > 3"), &[]).unwrap()), vec!["h1"]);
}

#[test]
fn test_connectives_fold_left() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    // ((tags = random or variables = 150) and clauses = 100) matches nothing
    assert!(db
        .hashes::<&str>(Some("tags = random or variables = 150 and clauses = 100"), &[])
        .unwrap()
        .is_empty());
    assert_eq!(
        sorted(db.hashes::<&str>(Some("tags = random or (variables = 150 and clauses = 600)"), &[]).unwrap()),
        vec!["h1", "h3"]
    );
}

#[test]
fn test_hash_restriction() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    assert_eq!(db.hashes(Some("tags = industrial"), &["h2", "h3"]).unwrap(), vec!["h2"]);
    assert_eq!(sorted(db.hashes(None, &["h1", "h3", "missing"]).unwrap()), vec!["h1", "h3"]);
}

#[test]
fn test_literals_are_bound_not_spliced() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    let compiled = QueryBuilder::new("hash").filter("tags = industrial").build(db.schema()).unwrap();
    assert!(!compiled.sql.contains("industrial"));
    assert_eq!(compiled.params, vec!["industrial"]);
}

#[test]
fn test_resolve_collapses_multi_values() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    db.set_attribute("tags", "crafted", &["h1"], false).unwrap();

    let rows = db.resolve(&["h1"], &["tags", "variables"], Some(benchdb::Collapse::Min), None).unwrap();
    assert_eq!(
        rows,
        vec![vec![Some("h1".to_string()), Some("crafted".to_string()), Some("150".to_string())]]
    );

    let rows = db.resolve(&[], &["tags"], None, Some("random")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("h3"));
}

#[test]
fn test_group_by_multi_valued_feature() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    let rows = db.query_search::<&str>(None, &[], &[], None, "tags").unwrap();
    let mut anchors: Vec<String> = rows.into_iter().filter_map(|r| r[0].clone()).collect();
    anchors.sort();
    assert_eq!(anchors, vec!["industrial", "random"]);
}

#[test]
fn test_translator_join_reaches_foreign_context() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = store(&dir);
    db.create_feature("sancnf_family", None).unwrap();
    db.set_attribute("sancnf_family", "crypto", &["s1"], false).unwrap();
    db.set_attribute("sancnf_family", "planning", &["s3"], false).unwrap();
    db.schema()
        .database()
        .execute(
            "CREATE TABLE __translator_cnf_sancnf (hash TEXT NOT NULL, value TEXT NOT NULL); \
             INSERT INTO __translator_cnf_sancnf VALUES ('h1', 's1'), ('h3', 's3');",
        )
        .unwrap();

    assert_eq!(db.hashes::<&str>(Some("sancnf_family = crypto"), &[]).unwrap(), vec!["h1"]);
    assert_eq!(
        db.hashes::<&str>(Some("sancnf_family = planning and tags = random"), &[]).unwrap(),
        vec!["h3"]
    );
}

#[test]
fn test_unknown_feature_surfaces_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    let err = db.hashes::<&str>(Some("nonexistent = x"), &[]).unwrap_err();
    assert!(matches!(err, BenchDbError::Storage(_)));
}

#[test]
fn test_malformed_filter_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = store(&dir);
    for filter in ["tags =", "tags == x", "and tags = x", "(tags = x", "tags > "] {
        let err = db.hashes::<&str>(Some(filter), &[]).unwrap_err();
        assert!(matches!(err, BenchDbError::QueryParse(_)), "accepted {filter:?}");
    }
}

fn filter_strategy() -> impl Strategy<Value = String> {
    let column = prop::sample::select(COLUMNS);
    let leaf = prop_oneof![
        (column.clone(), "[a-z0-9]{0,5}").prop_map(|(c, v)| format!("{c} = v{v}")),
        (column.clone(), "[a-z]{1,4}").prop_map(|(c, v)| format!("{c} like %{v}%")),
        (column, 0u32..1000).prop_map(|(c, n)| format!("{c} > {n}")),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        (inner.clone(), prop::bool::ANY, inner).prop_map(|(l, and, r)| {
            format!("({l}) {} ({r})", if and { "and" } else { "or" })
        })
    })
}

proptest! {
    #[test]
    fn test_compilation_is_deterministic(filter in filter_strategy()) {
        let builder = QueryBuilder::new("local").filter(filter).resolve(["family"]);
        let first = builder.build(&NameResolver::default()).unwrap();
        let second = builder.build(&NameResolver::default()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_every_column_is_joined_once(filter in filter_strategy()) {
        let compiled = QueryBuilder::new("local").filter(filter.clone()).build(&NameResolver::default()).unwrap();
        for column in COLUMNS {
            let joins = compiled.sql.matches(&format!("JOIN {column} ON")).count();
            let referenced = filter.split_whitespace().any(|w| w.trim_start_matches('(') == *column);
            prop_assert_eq!(joins, usize::from(referenced), "{}", column);
        }
    }

    #[test]
    fn test_one_translator_per_foreign_context(filter in filter_strategy()) {
        let compiled = QueryBuilder::new("local").filter(filter.clone()).build(&NameResolver::default()).unwrap();
        for (context, column) in [("sancnf", "sancnf_family"), ("kis", "kis_nodes")] {
            let translators = compiled.sql.matches(&format!("JOIN __translator_cnf_{context} ON")).count();
            prop_assert_eq!(translators, usize::from(filter.contains(column)));
        }
    }

    #[test]
    fn test_placeholders_match_params(filter in filter_strategy()) {
        let compiled = QueryBuilder::new("local")
            .filter(filter)
            .hashes(["h1", "h2"])
            .build(&NameResolver::default())
            .unwrap();
        prop_assert_eq!(compiled.sql.matches('?').count(), compiled.params.len());
    }
}
