use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, OpenFlags, ToSql, Transaction};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::Record;

/// Pool of SQLite connections behind a [`Database`].
pub type DbPool = Pool<SqliteConnectionManager>;
/// Connection checked out of a [`DbPool`]; returned to the pool on drop.
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// First 16 bytes of every SQLite database file.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Size of the SQLite file header; shorter non-empty files cannot be databases.
const SQLITE_HEADER_LEN: u64 = 100;

/// Where a schema's tables physically live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageHandle {
    /// A private database file
    File(PathBuf),
    /// A named in-memory store shared by every connection of this process
    Transient {
        /// Store name; schemas are only mergeable within the same store
        name: String,
    },
}

impl StorageHandle {
    /// Whether this handle refers to a shared in-memory store.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    fn manager(&self) -> SqliteConnectionManager {
        match self {
            Self::File(path) => SqliteConnectionManager::file(path),
            Self::Transient { name } => {
                SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
                    .with_flags(
                        OpenFlags::SQLITE_OPEN_READ_WRITE
                            | OpenFlags::SQLITE_OPEN_CREATE
                            | OpenFlags::SQLITE_OPEN_URI,
                    )
            }
        }
    }
}

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Transient { name } => write!(f, "memory:{name}"),
        }
    }
}

/// Check whether `path` is (or may become) a SQLite database.
///
/// A missing file is created empty and counts as a fresh database, as does a
/// zero-length file. Otherwise the magic header decides.
pub fn is_database(path: &Path) -> Result<bool> {
    if !path.is_file() {
        info!("Creating database {}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(path)?;
        return Ok(true);
    }

    let size = fs::metadata(path)?.len();
    if size == 0 {
        return Ok(true);
    }
    if size < SQLITE_HEADER_LEN {
        return Ok(false);
    }

    let mut header = [0u8; 16];
    fs::File::open(path)?.read_exact(&mut header)?;
    Ok(&header == SQLITE_MAGIC)
}

/// Kind of a schema object as reported by `sqlite_master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Ordinary table
    Table,
    /// View
    View,
}

/// Column metadata from `PRAGMA table_info`.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Declared default, verbatim SQL text
    pub default: Option<String>,
}

/// Database manager for handling connections and operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    handle: StorageHandle,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").field("handle", &self.handle).finish_non_exhaustive()
    }
}

impl Database {
    /// Create a connection pool for the given store
    pub fn open(handle: StorageHandle, config: &DatabaseConfig) -> Result<Self> {
        let mut builder = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs));

        // an idle connection keeps a shared in-memory store alive
        if handle.is_transient() {
            builder = builder.min_idle(Some(1)).idle_timeout(None);
        }

        let pool = builder.build(handle.manager())?;
        debug!(store = %handle, "Opened connection pool");
        Ok(Self { pool, handle })
    }

    /// Storage handle this pool connects to
    #[must_use]
    pub const fn handle(&self) -> &StorageHandle {
        &self.handle
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Execute one or more statements and commit
    pub fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "execute");
        let conn = self.get_connection()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run `f` inside a single transaction; commits only if `f` succeeds
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run a query and decode every column as optional text
    pub fn query<P: ToSql>(&self, sql: &str, params: &[P]) -> Result<Vec<Record>> {
        debug!(sql, "query");
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(sql)?;
        let width = stmt.column_count();
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(decode_value))
                .collect::<rusqlite::Result<Record>>()
        })?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Run a query and return the first column of every row, skipping NULLs
    pub fn query_column<P: ToSql>(&self, sql: &str, params: &[P]) -> Result<Vec<String>> {
        let records = self.query(sql, params)?;
        Ok(records.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect())
    }

    /// User tables and views, excluding SQLite internals and `__`-prefixed tables
    pub fn list_tables(&self) -> Result<Vec<(String, TableKind)>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT tbl_name, type FROM sqlite_master WHERE type IN ('table', 'view') \
             AND NOT tbl_name LIKE 'sqlite$_%' ESCAPE '$' AND NOT tbl_name LIKE '$_$_%' ESCAPE '$' \
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok((name, if kind == "view" { TableKind::View } else { TableKind::Table }))
        })?;
        let tables = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }

    /// Columns of a table or view
    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let rows = stmt.query_map([], |row| {
            Ok(ColumnInfo { name: row.get(1)?, default: row.get(4)? })
        })?;
        let columns = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
}

fn decode_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Quote a text literal for inclusion in generated SQL.
#[must_use]
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Strip the quoting SQLite keeps on declared column defaults.
#[must_use]
pub fn unquote_default(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            let inner = &trimmed[1..trimmed.len() - 1];
            let doubled = format!("{quote}{quote}");
            return inner.replace(&doubled, &quote.to_string());
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_as_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fresh.db");
        assert!(is_database(&path).unwrap());
        assert!(path.is_file());
    }

    #[test]
    fn test_csv_file_is_not_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "hash,family\n".repeat(20)).unwrap();
        assert!(!is_database(&path).unwrap());
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_unquote_default() {
        assert_eq!(unquote_default("'empty'"), "empty");
        assert_eq!(unquote_default("'it''s'"), "it's");
        assert_eq!(unquote_default("\"x\""), "x");
        assert_eq!(unquote_default("0"), "0");
    }

    #[test]
    fn test_transient_store_is_shared_between_connections() {
        let handle = StorageHandle::Transient { name: "db_rs_shared_test".to_string() };
        let db = Database::open(handle, &DatabaseConfig::default()).unwrap();
        db.execute("CREATE TABLE probe (hash TEXT); INSERT INTO probe VALUES ('a');").unwrap();
        let other = db.get_connection().unwrap();
        let _held = db.get_connection().unwrap();
        let count: i64 = other.query_row("SELECT COUNT(*) FROM probe", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
