//! Integration tests for the high-level store operations

use std::fs;
use std::path::Path;
use std::sync::Arc;

use benchdb::error::BenchDbError;
use benchdb::identity::IdentityProvider;
use benchdb::models::{Attribute, Job, ResultRecord};
use benchdb::runner::{ExtractError, Extractor, Limits};
use benchdb::{AppConfig, BenchDb, Runner, Sha256Identity};
use tempfile::TempDir;

/// Creates `a.cnf`, `nested/b.cnf` and an unrelated `notes.txt` below `root`.
fn benchmarks(root: &Path) {
    fs::create_dir_all(root.join("nested")).unwrap();
    fs::write(root.join("a.cnf"), "p cnf 2 1\n1 2 0\n").unwrap();
    fs::write(root.join("nested").join("b.cnf"), "p cnf 3 2\n1 -3 0\n2 3 0\n").unwrap();
    fs::write(root.join("notes.txt"), "not a benchmark\n").unwrap();
}

fn open(dir: &TempDir, jobs: usize) -> BenchDb {
    BenchDb::open(&[dir.path().join("store.db")], AppConfig::default())
        .unwrap()
        .with_runner(Runner::new(jobs, Limits::default()))
}

/// Counts the bytes of each benchmark into `size`.
struct SizeExtractor;

impl Extractor for SizeExtractor {
    fn name(&self) -> &str {
        "size"
    }

    fn target(&self) -> Option<&str> {
        Some("size")
    }

    fn extract(&self, job: &Job, _: &Limits) -> Result<ResultRecord, ExtractError> {
        let len = fs::metadata(&job.path).map_err(|e| ExtractError::Failed(e.to_string()))?.len();
        Ok(ResultRecord { hash: job.hash.clone(), attributes: vec![Attribute::replace("size", len.to_string())] })
    }
}

#[test]
fn test_init_local_registers_benchmarks() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    let mut db = open(&dir, 2);

    let report = db.init_local(&root, Sha256Identity).unwrap();
    assert_eq!(report.completed, 2);
    assert!(report.is_complete());

    let a_hash = Sha256Identity.identify(&root.join("a.cnf")).unwrap();
    assert_eq!(db.hashes::<&str>(Some("filename = a.cnf"), &[]).unwrap(), vec![a_hash.clone()]);
    assert_eq!(db.hashes::<&str>(None, &[]).unwrap().len(), 2);

    let rows = db.resolve(&[a_hash.as_str()], &["local"], None, None).unwrap();
    assert_eq!(rows[0][1].as_deref(), Some(root.join("a.cnf").display().to_string().as_str()));
}

#[test]
fn test_init_local_skips_known_paths() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    let mut db = open(&dir, 1);

    db.init_local(&root, Sha256Identity).unwrap();
    let again = db.init_local(&root, Sha256Identity).unwrap();
    assert_eq!(again.completed, 0);
    assert_eq!(db.feature_values("local").unwrap().len(), 2);
}

#[test]
fn test_identical_files_share_one_hash() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    fs::copy(root.join("a.cnf"), root.join("copy.cnf")).unwrap();
    let mut db = open(&dir, 1);

    db.init_local(&root, Sha256Identity).unwrap();
    assert_eq!(db.hashes::<&str>(None, &[]).unwrap().len(), 2);
    assert_eq!(db.feature_values("local").unwrap().len(), 3);
}

#[test]
fn test_stale_paths_are_detected_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    let mut db = open(&dir, 1);
    db.init_local(&root, Sha256Identity).unwrap();

    let gone = root.join("nested").join("b.cnf");
    fs::remove_file(&gone).unwrap();
    let stale = db.stale_paths().unwrap();
    assert_eq!(stale, vec![gone.display().to_string()]);

    assert_eq!(db.remove_paths(&stale).unwrap(), 1);
    assert!(db.stale_paths().unwrap().is_empty());
    assert_eq!(db.feature_values("local").unwrap(), vec![root.join("a.cnf").display().to_string()]);
}

#[test]
fn test_group_by_local_skips_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    let mut db = open(&dir, 1);
    db.init_local(&root, Sha256Identity).unwrap();

    let rows = db.query_search::<&str>(None, &[], &[], None, "local").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r[0].as_deref() != Some("None")));
}

#[test]
fn test_extract_creates_feature_and_skips_done_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    let mut db = open(&dir, 2);
    db.init_local(&root, Sha256Identity).unwrap();

    let report = db.extract::<&str>(None, &[], Arc::new(SizeExtractor)).unwrap();
    assert_eq!(report.completed, 2);
    let info = db.feature_info("size").unwrap();
    assert!(info.unique);
    assert_eq!(info.default.as_deref(), Some("empty"));
    assert_eq!(info.entries, 2);

    let a_hash = Sha256Identity.identify(&root.join("a.cnf")).unwrap();
    assert_eq!(db.hashes::<&str>(Some("size < 20"), &[]).unwrap(), vec![a_hash]);

    let again = db.extract::<&str>(None, &[], Arc::new(SizeExtractor)).unwrap();
    assert_eq!(again.completed, 0);
    assert_eq!(again.skipped, 2);
}

#[test]
fn test_group_by_keeps_real_none_value() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(&dir, 1);
    db.create_feature("tags", None).unwrap();
    db.set_attribute("tags", "None", &["h1"], false).unwrap();
    db.set_attribute("tags", "x", &["h1"], false).unwrap();

    let rows = db.query_search::<&str>(None, &[], &[], None, "tags").unwrap();
    let mut anchors: Vec<String> = rows.into_iter().filter_map(|r| r[0].clone()).collect();
    anchors.sort();
    assert_eq!(anchors, vec!["None", "x"]);
}

/// Emits a keyword key for `a.cnf` and a plain one elsewhere.
struct KeywordExtractor;

impl Extractor for KeywordExtractor {
    fn name(&self) -> &str {
        "keyword"
    }

    fn extract(&self, job: &Job, _: &Limits) -> Result<ResultRecord, ExtractError> {
        let key = if job.path.ends_with("a.cnf") { "order" } else { "depth" };
        Ok(ResultRecord { hash: job.hash.clone(), attributes: vec![Attribute::replace(key, "1")] })
    }
}

#[test]
fn test_extract_bad_key_fails_only_its_item() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    fs::write(root.join("c.cnf"), "p cnf 1 1\n1 0\n").unwrap();
    let mut db = open(&dir, 2);
    db.init_local(&root, Sha256Identity).unwrap();

    let report = db.extract::<&str>(None, &[], Arc::new(KeywordExtractor)).unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].0.path.ends_with("a.cnf"));
    assert!(!db.feature_exists("order"));
    assert_eq!(db.feature_info("depth").unwrap().entries, 2);
}

#[test]
fn test_extract_respects_filter() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("bench");
    benchmarks(&root);
    let mut db = open(&dir, 1);
    db.init_local(&root, Sha256Identity).unwrap();

    let report = db.extract::<&str>(Some("local like %nested%"), &[], Arc::new(SizeExtractor)).unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(db.feature_info("size").unwrap().entries, 1);
}

#[test]
fn test_import_csv_into_existing_feature() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("families.csv");
    fs::write(&csv, "hash,family,note\nh1,crypto,'a, b'\nh2,,x\nh3,planning,y\n").unwrap();
    let mut db = open(&dir, 1);
    db.create_feature("family", Some("unknown")).unwrap();

    assert_eq!(db.import_csv(&csv, "hash", "family", "family").unwrap(), 2);
    assert_eq!(db.hashes::<&str>(Some("family = crypto"), &[]).unwrap(), vec!["h1"]);
    assert_eq!(db.feature_values("family").unwrap(), vec!["crypto", "planning"]);
}

#[test]
fn test_import_csv_errors() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("families.csv");
    fs::write(&csv, "hash,family\nh1,crypto\n").unwrap();
    let mut db = open(&dir, 1);

    let err = db.import_csv(&csv, "hash", "family", "family").unwrap_err();
    assert!(matches!(err, BenchDbError::Schema(_)));

    db.create_feature("family", None).unwrap();
    let err = db.import_csv(&csv, "hash", "author", "family").unwrap_err();
    assert!(matches!(err, BenchDbError::Schema(_)));
}

#[test]
fn test_database_info() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = open(&dir, 1);
    db.create_feature("tags", None).unwrap();
    db.create_feature("family", Some("unknown")).unwrap();

    let info = db.database_info();
    assert_eq!(info.name, "store_db");
    assert_eq!(info.context, "cnf");
    assert_eq!(info.features, vec!["family", "hash", "tags"]);
    assert_eq!(info.tables, vec!["features", "tags"]);
}
