//! Dynamic schema engine.
//!
//! A [`Schema`] maps feature names to the tables and columns holding their
//! values and performs all DDL needed to keep that mapping consistent with
//! physical storage. Unique features are defaulted columns of the canonical
//! `features` table; multi-valued features are `(hash, value)` tables kept in
//! sync with `features` through insert triggers.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rusqlite::{params, params_from_iter, Transaction};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::context::Context;
use crate::db::{is_database, quote_literal, unquote_default, Database, StorageHandle, TableKind};
use crate::error::{BenchDbError, Result};
use crate::metrics;
use crate::models::{AttributeOp, FeatureInfo, ResultRecord};
use crate::query::{FeatureLocation, FeatureResolver};
use crate::runner::ResultSink;
use crate::validation::InputValidator;

/// Names with a fixed meaning in every store
pub mod names {
    /// Canonical table holding every known hash
    pub const FEATURES_TABLE: &str = "features";
    /// Feature naming the hash column of [`FEATURES_TABLE`]
    pub const HASH: &str = "hash";
    /// Value column of multi-valued tables
    pub const VALUE: &str = "value";
    /// File path pointers
    pub const LOCAL: &str = "local";
    /// Basename view over [`LOCAL`]
    pub const FILENAME: &str = "filename";
    /// Hash and value of the row seeding every multi-valued table
    pub const SENTINEL: &str = "None";
    /// Default of unique features created on the fly by extractors
    pub const AUTO_DEFAULT: &str = "empty";
}

use names::{AUTO_DEFAULT, FEATURES_TABLE, FILENAME, HASH, LOCAL, SENTINEL, VALUE};

/// Registry of the features of one store.
#[derive(Debug, Clone)]
pub struct Schema {
    dbname: String,
    context: Context,
    db: Database,
    features: BTreeMap<String, FeatureInfo>,
}

impl Schema {
    /// Open `path`: databases are introspected, anything else is imported as CSV.
    pub fn create(path: &Path, config: &AppConfig) -> Result<Self> {
        if is_database(path)? {
            Self::from_database(path, config)
        } else {
            Self::from_csv(path, config)
        }
    }

    /// Open a database file and rebuild the feature map from its tables.
    pub fn from_database(path: &Path, config: &AppConfig) -> Result<Self> {
        let dbname = InputValidator::dbname_from_path(path);
        let context = Context::from_name(&dbname);
        let db = Database::open(StorageHandle::File(path.to_path_buf()), &config.database)?;
        let features = introspect(&db)?;
        debug!(dbname, context = %context, features = features.len(), "opened schema");
        Ok(Self { dbname, context, db, features })
    }

    /// Load a CSV file with a `hash` column into the shared in-memory store.
    ///
    /// Every column becomes a read-only feature named after its sanitized header.
    pub fn from_csv(path: &Path, config: &AppConfig) -> Result<Self> {
        let table = InputValidator::dbname_from_path(path);
        InputValidator::validate_identifier(&table)?;

        let mut reader = csv::ReaderBuilder::new().delimiter(config.separator()).from_path(path)?;
        let columns: Vec<String> =
            reader.headers()?.iter().map(InputValidator::sanitize_identifier).collect();
        if !columns.iter().any(|c| c == HASH) {
            return Err(BenchDbError::schema(format!(
                "Column '{HASH}' not found in {}",
                path.display()
            )));
        }
        for column in &columns {
            InputValidator::validate_identifier(column)?;
        }

        let handle = StorageHandle::Transient { name: config.database.transient_name.clone() };
        let db = Database::open(handle, &config.database)?;
        let rows = db.transaction(|tx| {
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({})",
                columns.join(", ")
            ))?;
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut stmt = tx.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})"))?;
            let mut rows = 0;
            for record in reader.records() {
                let record = record?;
                stmt.execute(params_from_iter(record.iter()))?;
                rows += 1;
            }
            Ok(rows)
        })?;
        info!(table, rows, "imported csv into transient store");

        let features = columns
            .iter()
            .map(|column| {
                let info = FeatureInfo {
                    name: column.clone(),
                    table: table.clone(),
                    column: column.clone(),
                    default: None,
                    is_virtual: true,
                };
                (column.clone(), info)
            })
            .collect();

        Ok(Self {
            dbname: config.database.transient_name.clone(),
            context: Context::from_name(&table),
            db,
            features,
        })
    }

    /// Database name derived from the file name.
    #[must_use]
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Hash context of this store.
    #[must_use]
    pub const fn context(&self) -> Context {
        self.context
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Whether the store is a shared in-memory one.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.db.handle().is_transient()
    }

    /// Whether `name` is a known feature.
    #[must_use]
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Descriptor of a feature.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&FeatureInfo> {
        self.features.get(name)
    }

    /// Descriptor of a feature, failing for unknown names.
    pub fn require(&self, name: &str) -> Result<&FeatureInfo> {
        self.features
            .get(name)
            .ok_or_else(|| BenchDbError::schema(format!("Feature '{name}' does not exist")))
    }

    /// All features, ordered by name.
    pub fn features(&self) -> impl Iterator<Item = &FeatureInfo> {
        self.features.values()
    }

    /// Names of all features, ordered.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.features.keys().cloned().collect()
    }

    /// Distinct tables and views referenced by features, ordered.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.features.values().map(|f| f.table.clone()).collect();
        tables.sort();
        tables.dedup();
        tables
    }

    fn has_features_table(&self) -> bool {
        self.features.get(HASH).is_some_and(|f| f.table == FEATURES_TABLE)
    }

    /// Create the `features` table on first use.
    ///
    /// Hashes already present in other tables are copied over and every such
    /// table gets an insert trigger feeding new hashes into `features`.
    fn ensure_features_table(&mut self) -> Result<Vec<FeatureInfo>> {
        if self.has_features_table() {
            return Ok(Vec::new());
        }

        let sources: Vec<String> = self
            .features
            .values()
            .filter(|f| !f.is_virtual && f.table != FEATURES_TABLE)
            .map(|f| f.table.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        self.db.transaction(|tx| {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {FEATURES_TABLE} (hash TEXT UNIQUE NOT NULL)"
            ))?;
            for table in &sources {
                tx.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {FEATURES_TABLE} (hash) \
                         SELECT DISTINCT(hash) FROM {table} WHERE hash != ?1"
                    ),
                    params![SENTINEL],
                )?;
                tx.execute_batch(&hash_trigger(table))?;
            }
            Ok(())
        })?;
        info!(backfilled = sources.len(), "created features table");

        let info = FeatureInfo {
            name: HASH.to_string(),
            table: FEATURES_TABLE.to_string(),
            column: HASH.to_string(),
            default: None,
            is_virtual: false,
        };
        self.features.insert(HASH.to_string(), info.clone());
        Ok(vec![info])
    }

    /// Create a feature; a default makes it unique, otherwise it is multi-valued.
    ///
    /// Returns every feature created along the way (the hash feature on first
    /// use, the basename view for a context's `local` feature). With
    /// `permissive`, store-owned names are accepted and an existing feature is
    /// left untouched; SQLite keywords are rejected either way.
    pub fn create_feature(
        &mut self,
        name: &str,
        default: Option<&str>,
        permissive: bool,
    ) -> Result<Vec<FeatureInfo>> {
        if permissive {
            InputValidator::validate_column_name(name)?;
        } else {
            InputValidator::validate_feature_name(name)?;
        }

        if self.has_feature(name) {
            if permissive {
                return Ok(Vec::new());
            }
            return Err(BenchDbError::schema(format!("Feature '{name}' already exists")));
        }

        let mut created = self.ensure_features_table()?;

        let info = if let Some(default) = default {
            self.db.execute(&format!(
                "ALTER TABLE {FEATURES_TABLE} ADD COLUMN {name} TEXT NOT NULL DEFAULT {}",
                quote_literal(default)
            ))?;
            FeatureInfo {
                name: name.to_string(),
                table: FEATURES_TABLE.to_string(),
                column: name.to_string(),
                default: Some(default.to_string()),
                is_virtual: false,
            }
        } else {
            self.db.execute(&format!(
                "CREATE TABLE IF NOT EXISTS {name} (hash TEXT NOT NULL, value TEXT NOT NULL, \
                 CONSTRAINT all_unique UNIQUE(hash, value)); \
                 INSERT OR IGNORE INTO {name} (hash, value) VALUES ('{SENTINEL}', '{SENTINEL}'); \
                 {}",
                hash_trigger(name)
            ))?;
            FeatureInfo {
                name: name.to_string(),
                table: name.to_string(),
                column: VALUE.to_string(),
                default: None,
                is_virtual: false,
            }
        };
        info!(feature = name, unique = info.is_unique(), "created feature");
        self.features.insert(name.to_string(), info.clone());
        created.push(info);

        if let Some(view) = filename_view(name) {
            created.push(self.create_filename_view(&view, name)?);
        }
        Ok(created)
    }

    fn create_filename_view(&mut self, view: &str, local: &str) -> Result<FeatureInfo> {
        self.db.execute(&format!(
            "CREATE VIEW IF NOT EXISTS {view} (hash, value) AS \
             SELECT hash, REPLACE(value, RTRIM(value, REPLACE(value, '/', '')), '') FROM {local}"
        ))?;
        let info = FeatureInfo {
            name: view.to_string(),
            table: view.to_string(),
            column: VALUE.to_string(),
            default: None,
            is_virtual: true,
        };
        self.features.insert(view.to_string(), info.clone());
        Ok(info)
    }

    fn writable(&self, name: &str) -> Result<FeatureInfo> {
        let info = self.require(name)?;
        if info.is_virtual || info.column == HASH {
            return Err(BenchDbError::schema(format!("Feature '{name}' is read-only")));
        }
        Ok(info.clone())
    }

    /// Write `value` for every hash; returns the number of rows changed.
    ///
    /// Unique features are upserted, so hashes not yet in `features` get a
    /// row. Multi-valued inserts of an existing pair are ignored.
    pub fn set_values<S: AsRef<str>>(&self, feature: &str, value: &str, hashes: &[S]) -> Result<usize> {
        let info = self.writable(feature)?;
        let changed = self.db.transaction(|tx| {
            let mut changed = 0;
            for hash in hashes {
                changed += write_value(tx, &info, hash.as_ref(), value)?;
            }
            Ok(changed)
        })?;
        debug!(feature, value, hashes = hashes.len(), changed, "set values");
        Ok(changed)
    }

    /// Write `(hash, value)` pairs in one transaction.
    pub fn set_pairs(&self, feature: &str, pairs: &[(String, String)]) -> Result<usize> {
        let info = self.writable(feature)?;
        self.db.transaction(|tx| {
            let mut changed = 0;
            for (hash, value) in pairs {
                changed += write_value(tx, &info, hash, value)?;
            }
            Ok(changed)
        })
    }

    /// Delete values; empty `values` or `hashes` match everything.
    ///
    /// Unique features are reset to their default, multi-valued rows are
    /// removed. The sentinel row is never touched.
    pub fn delete_values<S: AsRef<str>>(&self, feature: &str, values: &[S], hashes: &[S]) -> Result<usize> {
        let info = self.writable(feature)?;
        let mut params: Vec<String> = Vec::new();

        let mut sql = match &info.default {
            Some(default) => {
                params.push(default.clone());
                format!("UPDATE {} SET {} = ? WHERE 1=1", info.table, info.column)
            }
            None => {
                params.push(SENTINEL.to_string());
                format!("DELETE FROM {} WHERE hash != ?", info.table)
            }
        };
        if !hashes.is_empty() {
            sql.push_str(&format!(" AND hash IN ({})", placeholders(hashes.len())));
            params.extend(hashes.iter().map(|h| h.as_ref().to_string()));
        }
        if !values.is_empty() {
            sql.push_str(&format!(" AND {} IN ({})", info.column, placeholders(values.len())));
            params.extend(values.iter().map(|v| v.as_ref().to_string()));
        }

        let changed = self.db.transaction(|tx| Ok(tx.execute(&sql, params_from_iter(params.iter()))?))?;
        debug!(feature, changed, "deleted values");
        Ok(changed)
    }

    /// Delete every value of a feature.
    pub fn clear_feature(&self, name: &str) -> Result<usize> {
        self.delete_values::<&str>(name, &[], &[])
    }

    /// Drop a feature's column, table or view.
    pub fn remove_feature(&mut self, name: &str) -> Result<()> {
        let info = self.require(name)?.clone();
        if info.column == HASH {
            return Err(BenchDbError::schema(format!("Feature '{name}' holds the hash column")));
        }

        if info.is_virtual {
            let is_view = self
                .db
                .list_tables()?
                .iter()
                .any(|(table, kind)| *table == info.table && *kind == TableKind::View);
            if !is_view {
                return Err(BenchDbError::schema(format!("Feature '{name}' is read-only")));
            }
            self.db.execute(&format!("DROP VIEW IF EXISTS {}", info.table))?;
        } else if info.is_unique() {
            self.db.execute(&format!("ALTER TABLE {} DROP COLUMN {}", info.table, info.column))?;
        } else {
            if let Some(view) = filename_view(name) {
                self.db.execute(&format!("DROP VIEW IF EXISTS {view}"))?;
                self.features.remove(&view);
            }
            self.db.execute(&format!("DROP TABLE IF EXISTS {}", info.table))?;
        }

        self.features.remove(name);
        info!(feature = name, "removed feature");
        Ok(())
    }

    /// Absorb the features of another schema living in the same transient store.
    pub fn merge(&mut self, other: Self) -> Result<()> {
        if !self.is_transient() || !other.is_transient() || self.db.handle() != other.db.handle() {
            return Err(BenchDbError::schema(format!(
                "Cannot merge schema {} into {}: only schemas of one transient store can be merged",
                other.db.handle(),
                self.db.handle()
            )));
        }
        self.features.extend(other.features);
        Ok(())
    }

    /// Apply one runner result in a single transaction.
    ///
    /// Unknown features are created first: `INSERT` makes a multi-valued
    /// feature, `REPLACE` a unique one defaulting to `empty`. `REPLACE` on a
    /// multi-valued feature drops the hash's previous values. Every new name
    /// is validated before any DDL runs.
    pub fn apply_record(&mut self, record: &ResultRecord) -> Result<()> {
        for attr in record.attributes.iter().filter(|a| !self.has_feature(&a.feature)) {
            InputValidator::validate_column_name(&attr.feature)?;
        }
        for attr in &record.attributes {
            if !self.has_feature(&attr.feature) {
                let default = match attr.op {
                    AttributeOp::Insert => None,
                    AttributeOp::Replace => Some(AUTO_DEFAULT),
                };
                self.create_feature(&attr.feature, default, true)?;
            }
        }

        let targets = record
            .attributes
            .iter()
            .map(|attr| self.writable(&attr.feature))
            .collect::<Result<Vec<_>>>()?;

        self.db.transaction(|tx| {
            for (attr, info) in record.attributes.iter().zip(&targets) {
                if attr.op == AttributeOp::Replace && !info.is_unique() {
                    tx.execute(&format!("DELETE FROM {} WHERE hash = ?1", info.table), params![record.hash])?;
                }
                write_value(tx, info, &record.hash, &attr.value)?;
            }
            Ok(())
        })?;

        for op in [AttributeOp::Insert, AttributeOp::Replace] {
            let count = record.attributes.iter().filter(|a| a.op == op).count();
            if count > 0 {
                metrics::record_writes(if op == AttributeOp::Insert { "insert" } else { "replace" }, count);
            }
        }
        Ok(())
    }

    /// Hashes holding a value for `feature` (other than the default for unique ones).
    pub fn hashes_with_values(&self, feature: &str) -> Result<HashSet<String>> {
        let info = self.require(feature)?;
        let hashes = match &info.default {
            Some(default) => self.db.query_column(
                &format!("SELECT hash FROM {} WHERE {} != ?", info.table, info.column),
                &[default],
            )?,
            None => self.db.query_column(
                &format!("SELECT DISTINCT hash FROM {} WHERE hash != ?", info.table),
                &[SENTINEL],
            )?,
        };
        Ok(hashes.into_iter().collect())
    }

    /// Number of stored values, not counting defaults or the sentinel.
    pub fn count_entries(&self, feature: &str) -> Result<usize> {
        let info = self.require(feature)?;
        let (sql, param) = match &info.default {
            Some(default) => (
                format!("SELECT COUNT(*) FROM {} WHERE {} != ?", info.table, info.column),
                default.as_str(),
            ),
            None => (format!("SELECT COUNT(*) FROM {} WHERE hash != ?", info.table), SENTINEL),
        };
        let count = self.db.query_column(&sql, &[param])?;
        Ok(count.first().and_then(|c| c.parse().ok()).unwrap_or(0))
    }

    /// Distinct values of a feature, ordered.
    pub fn distinct_values(&self, feature: &str) -> Result<Vec<String>> {
        let info = self.require(feature)?;
        self.db.query_column(
            &format!(
                "SELECT DISTINCT {col} FROM {table} WHERE hash != ? ORDER BY {col}",
                col = info.column,
                table = info.table
            ),
            &[SENTINEL],
        )
    }
}

impl FeatureResolver for Schema {
    fn locate(&self, feature: &str) -> FeatureLocation {
        let (table, column) = self.features.get(feature).map_or_else(
            || (feature.to_string(), VALUE.to_string()),
            |info| (info.table.clone(), info.column.clone()),
        );
        FeatureLocation { context: Context::from_name_or(&table, self.context), table, column }
    }
}

impl ResultSink for Schema {
    fn write(&mut self, record: &ResultRecord) -> Result<()> {
        self.apply_record(record)
    }
}

/// Basename view accompanying `name` when it is some context's local feature.
fn filename_view(name: &str) -> Option<String> {
    Context::all().find(|c| c.prepend(LOCAL) == name).map(|c| c.prepend(FILENAME))
}

fn hash_trigger(table: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_hash AFTER INSERT ON {table} \
         BEGIN INSERT OR IGNORE INTO {FEATURES_TABLE} (hash) VALUES (NEW.hash); END"
    )
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn write_value(tx: &Transaction<'_>, info: &FeatureInfo, hash: &str, value: &str) -> Result<usize> {
    let sql = if info.is_unique() {
        format!(
            "INSERT INTO {table} (hash, {col}) VALUES (?1, ?2) \
             ON CONFLICT (hash) DO UPDATE SET {col} = excluded.{col}",
            table = info.table,
            col = info.column
        )
    } else {
        format!("INSERT OR IGNORE INTO {} (hash, {}) VALUES (?1, ?2)", info.table, info.column)
    };
    Ok(tx.prepare_cached(&sql)?.execute(params![hash, value])?)
}

/// Rebuild the feature map from `sqlite_master`.
///
/// The `features` table is read last so that its pointer columns never
/// shadow a multi-valued table of the same name.
fn introspect(db: &Database) -> Result<BTreeMap<String, FeatureInfo>> {
    let mut tables = db.list_tables()?;
    if let Some(pos) = tables.iter().position(|(t, k)| t == FEATURES_TABLE && *k == TableKind::Table) {
        let main = tables.remove(pos);
        tables.push(main);
    }
    let table_names: HashSet<String> = tables.iter().map(|(t, _)| t.clone()).collect();

    let mut features = BTreeMap::new();
    for (table, kind) in &tables {
        let columns = db.table_columns(table)?;
        let is_main = table == FEATURES_TABLE;
        let is_pair = columns.len() == 2 && columns.iter().all(|c| c.name == HASH || c.name == VALUE);
        let is_virtual = *kind == TableKind::View || !(is_main || is_pair);

        for column in columns {
            if table_names.contains(&column.name) {
                continue;
            }
            let name = if column.name == HASH {
                if !is_main && features.contains_key(HASH) {
                    continue;
                }
                HASH.to_string()
            } else if column.name == VALUE && is_pair {
                table.clone()
            } else {
                column.name.clone()
            };
            let default = if is_main && column.name != HASH {
                Some(column.default.as_deref().map(unquote_default).unwrap_or_default())
            } else {
                None
            };
            let is_virtual = is_virtual && !(is_main && column.name == HASH);
            features.insert(
                name.clone(),
                FeatureInfo { name, table: table.clone(), column: column.name, default, is_virtual },
            );
        }
    }

    if features.values().any(|f| f.is_virtual && !f.table.ends_with(FILENAME)) {
        warn!("store contains tables that are not managed features; they are read-only");
    }
    Ok(features)
}
