//! High-level access to a benchmark store.
//!
//! [`BenchDb`] ties the schema engine, the query compiler and the runner
//! together behind the operations the command line exposes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::context::Context;
use crate::error::{BenchDbError, Result};
use crate::identity::{IdentityExtractor, IdentityProvider};
use crate::logging::OperationTimer;
use crate::metrics;
use crate::models::{Collapse, DatabaseInfo, FeatureInfo, GroupInfo, Job, Record};
use crate::query::QueryBuilder;
use crate::runner::{Extractor, RunReport, Runner};
use crate::schema::names::{HASH, LOCAL, SENTINEL};
use crate::schema::Schema;

/// A store opened from one database file or a set of CSV files.
#[derive(Debug)]
pub struct BenchDb {
    schema: Schema,
    config: AppConfig,
    runner: Runner,
}

impl BenchDb {
    /// Open `paths`; additional paths are merged into the first schema.
    ///
    /// Only schemas living in the shared in-memory store (CSV imports) can be
    /// combined.
    pub fn open<P: AsRef<Path>>(paths: &[P], config: AppConfig) -> Result<Self> {
        let (first, rest) = paths
            .split_first()
            .ok_or_else(|| BenchDbError::InvalidConfig("no database given".to_string()))?;
        let mut schema = Schema::create(first.as_ref(), &config)?;
        for path in rest {
            schema.merge(Schema::create(path.as_ref(), &config)?)?;
        }
        let runner = Runner::from_config(&config.runner);
        Ok(Self { schema, config, runner })
    }

    /// Replace the runner, e.g. to change the job count.
    #[must_use]
    pub fn with_runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    /// Underlying schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Hash context of the store.
    #[must_use]
    pub const fn context(&self) -> Context {
        self.schema.context()
    }

    /// Name of the local path feature of this store's context.
    #[must_use]
    pub fn local_feature(&self) -> String {
        self.context().prepend(LOCAL)
    }

    /// Whether `name` is a known feature.
    #[must_use]
    pub fn feature_exists(&self, name: &str) -> bool {
        self.schema.has_feature(name)
    }

    /// Create a feature group; a default makes it unique.
    pub fn create_feature(&mut self, name: &str, default: Option<&str>) -> Result<Vec<FeatureInfo>> {
        self.schema.create_feature(name, default, false)
    }

    /// Drop a feature group.
    pub fn remove_feature(&mut self, name: &str) -> Result<()> {
        self.schema.remove_feature(name)
    }

    /// Delete all values of a feature group.
    pub fn clear_feature(&self, name: &str) -> Result<usize> {
        self.schema.clear_feature(name)
    }

    /// Set `value` for `hashes`.
    ///
    /// For unique features, hashes already holding a different non-default
    /// value are only overwritten with `force`.
    pub fn set_attribute<S: AsRef<str>>(
        &self,
        feature: &str,
        value: &str,
        hashes: &[S],
        force: bool,
    ) -> Result<usize> {
        let info = self.schema.require(feature)?;
        if force || !info.is_unique() {
            return self.schema.set_values(feature, value, hashes);
        }

        let holding = self.schema.hashes_with_values(feature)?;
        let current = self.hash_values(feature)?;
        let (targets, kept): (Vec<&str>, Vec<&str>) = hashes
            .iter()
            .map(AsRef::as_ref)
            .partition(|h| !holding.contains(*h) || current.contains(&(h.to_string(), value.to_string())));
        if !kept.is_empty() {
            warn!(feature, count = kept.len(), "hashes already hold a value, use force to overwrite");
        }
        self.schema.set_values(feature, value, &targets)
    }

    fn hash_values(&self, feature: &str) -> Result<HashSet<(String, String)>> {
        let info = self.schema.require(feature)?;
        let rows = self.schema.database().query::<&str>(
            &format!("SELECT hash, {} FROM {}", info.column, info.table),
            &[],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|r| match r.as_slice() {
                [Some(h), Some(v)] => Some((h.clone(), v.clone())),
                _ => None,
            })
            .collect())
    }

    /// Delete values of a feature; empty slices match everything.
    pub fn remove_attribute<S: AsRef<str>>(&self, feature: &str, values: &[S], hashes: &[S]) -> Result<usize> {
        self.schema.delete_values(feature, values, hashes)
    }

    /// Compile and run a query.
    ///
    /// Rows are `group_by` followed by one collapsed column per `resolve`
    /// feature. Rows without an anchor value are dropped, as is the sentinel
    /// row of a multi-valued anchor.
    pub fn query_search<S: AsRef<str>>(
        &self,
        filter: Option<&str>,
        hashes: &[S],
        resolve: &[S],
        collapse: Option<Collapse>,
        group_by: &str,
    ) -> Result<Vec<Record>> {
        let collapse = match collapse {
            Some(c) => c,
            None => self.config.collapse()?,
        };
        let mut builder = QueryBuilder::new(group_by)
            .hashes(hashes.iter().map(AsRef::as_ref))
            .resolve(resolve.iter().map(AsRef::as_ref))
            .collapse(collapse)
            .join(self.config.join_kind()?);
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        let anchor_is_multi =
            !self.schema.feature(group_by).is_some_and(|f| f.is_unique() || f.column == HASH);
        if anchor_is_multi {
            builder = builder.exclude_hash(SENTINEL);
        }
        let compiled = builder.build(&self.schema)?;

        let timer = OperationTimer::new("query");
        let result = self.schema.database().query(&compiled.sql, &compiled.params);
        metrics::record_query(timer.elapsed(), result.is_ok());
        let rows = result?;

        Ok(rows.into_iter().filter(|row| matches!(row.first(), Some(Some(_)))).collect())
    }

    /// Hashes matching `filter`, optionally restricted to `hashes`.
    pub fn hashes<S: AsRef<str>>(&self, filter: Option<&str>, hashes: &[S]) -> Result<Vec<String>> {
        let rows = self.query_search::<&str>(
            filter,
            &hashes.iter().map(AsRef::as_ref).collect::<Vec<_>>(),
            &[],
            None,
            HASH,
        )?;
        Ok(rows.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect())
    }

    /// Collapsed values of `features` per hash.
    ///
    /// With `pattern`, only rows where some resolved value contains it are kept.
    pub fn resolve<S: AsRef<str>>(
        &self,
        hashes: &[S],
        features: &[S],
        collapse: Option<Collapse>,
        pattern: Option<&str>,
    ) -> Result<Vec<Record>> {
        let rows = self.query_search(None, hashes, features, collapse, HASH)?;
        Ok(match pattern {
            Some(pattern) => rows
                .into_iter()
                .filter(|row| row.iter().skip(1).flatten().any(|v| v.contains(pattern)))
                .collect(),
            None => rows,
        })
    }

    /// Summary of one feature group.
    pub fn feature_info(&self, name: &str) -> Result<GroupInfo> {
        let info = self.schema.require(name)?;
        Ok(GroupInfo {
            name: info.name.clone(),
            table: info.table.clone(),
            unique: info.is_unique(),
            default: info.default.clone(),
            is_virtual: info.is_virtual,
            entries: self.schema.count_entries(name)?,
        })
    }

    /// Distinct values of a feature.
    pub fn feature_values(&self, name: &str) -> Result<Vec<String>> {
        self.schema.distinct_values(name)
    }

    /// Summary of the store.
    #[must_use]
    pub fn database_info(&self) -> DatabaseInfo {
        DatabaseInfo {
            name: self.schema.dbname().to_string(),
            context: self.context().name().to_string(),
            tables: self.schema.tables(),
            features: self.schema.feature_names(),
        }
    }

    /// Register benchmark files below `root` that are not yet known.
    ///
    /// Files are recognized by the context's suffixes and hashed with
    /// `provider` through the runner.
    pub fn init_local<P>(&mut self, root: &Path, provider: P) -> Result<RunReport>
    where
        P: IdentityProvider + 'static,
    {
        let local = self.local_feature();
        let known: HashSet<String> = if self.feature_exists(&local) {
            self.schema.distinct_values(&local)?.into_iter().collect()
        } else {
            HashSet::new()
        };

        let context = self.context();
        let mut jobs = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| BenchDbError::Other(format!("walking {}: {e}", root.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().display().to_string();
            if !context.matches_file(&path) {
                continue;
            }
            if known.contains(&path) {
                info!(path, "already registered");
            } else {
                jobs.push(Job::new("", PathBuf::from(path)));
            }
        }
        info!(root = %root.display(), found = jobs.len(), jobs = self.runner.jobs(), "initializing local paths");

        let extractor = Arc::new(IdentityExtractor::new(provider, local));
        self.runner.run(jobs, &HashSet::new(), extractor, &mut self.schema)
    }

    /// Registered paths that no longer exist on disk.
    pub fn stale_paths(&self) -> Result<Vec<String>> {
        let local = self.local_feature();
        if !self.feature_exists(&local) {
            return Ok(Vec::new());
        }
        let stale: Vec<String> = self
            .schema
            .distinct_values(&local)?
            .into_iter()
            .filter(|p| !Path::new(p).is_file())
            .collect();
        if !stale.is_empty() {
            warn!(count = stale.len(), "registered files not found");
        }
        Ok(stale)
    }

    /// Remove path entries, typically those returned by [`Self::stale_paths`].
    pub fn remove_paths(&self, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        self.schema.delete_values(&self.local_feature(), paths, &[])
    }

    /// Run `extractor` over the instances matching `filter` and `hashes`.
    ///
    /// Hashes already holding a value for the extractor's target feature are
    /// skipped.
    pub fn extract<S: AsRef<str>>(
        &mut self,
        filter: Option<&str>,
        hashes: &[S],
        extractor: Arc<dyn Extractor>,
    ) -> Result<RunReport> {
        let local = self.local_feature();
        let hashes: Vec<&str> = hashes.iter().map(AsRef::as_ref).collect();
        let rows = self.query_search(filter, &hashes, &[local.as_str()], Some(Collapse::Min), HASH)?;
        let jobs: Vec<Job> = rows
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [Some(hash), Some(path)] => Some(Job::new(hash.clone(), path.clone())),
                _ => None,
            })
            .collect();

        let done = match extractor.target() {
            Some(target) if self.feature_exists(target) => self.schema.hashes_with_values(target)?,
            _ => HashSet::new(),
        };
        self.runner.run(jobs, &done, extractor, &mut self.schema)
    }

    /// Import `source` values keyed by `key` from a CSV file into `target`.
    pub fn import_csv(&self, path: &Path, key: &str, source: &str, target: &str) -> Result<usize> {
        if !self.feature_exists(target) {
            return Err(BenchDbError::schema(format!(
                "Target feature '{target}' does not exist. Import canceled."
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.separator())
            .quote(b'\'')
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| BenchDbError::schema(format!("Column '{name}' not found in {}", path.display())))
        };
        let (key_idx, source_idx) = (column(key)?, column(source)?);

        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record?;
            let value = record.get(source_idx).map_or("", str::trim);
            if value.is_empty() {
                continue;
            }
            let hash = record.get(key_idx).map_or("", str::trim);
            pairs.push((hash.to_string(), value.to_string()));
        }
        info!(count = pairs.len(), target, "inserting values");
        self.schema.set_pairs(target, &pairs)
    }
}
