//! Data models shared by the schema engine, the query path and the runner.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BenchDbError;

/// Descriptor of one named feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureInfo {
    /// Feature name, unique within a schema
    pub name: String,
    /// Table (or view) holding the values
    pub table: String,
    /// Column holding the values
    pub column: String,
    /// Default value; present exactly for unique features
    pub default: Option<String>,
    /// Backed by a view or an imported CSV table rather than a writable table
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
}

impl FeatureInfo {
    /// Unique features store exactly one value per hash.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.default.is_some()
    }
}

/// One row of a resultset; `None` marks a missing value from an outer join.
pub type Record = Vec<Option<String>>;

/// How a runner result is applied to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeOp {
    /// Add a value (multi-valued features keep existing values)
    Insert,
    /// Replace whatever the hash held before
    Replace,
}

impl fmt::Display for AttributeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("INSERT"),
            Self::Replace => f.write_str("REPLACE"),
        }
    }
}

/// A single attribute update produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Write mode
    pub op: AttributeOp,
    /// Target feature name
    pub feature: String,
    /// Value as text
    pub value: String,
}

impl Attribute {
    /// Convenience constructor for an insert.
    pub fn insert(feature: impl Into<String>, value: impl Into<String>) -> Self {
        Self { op: AttributeOp::Insert, feature: feature.into(), value: value.into() }
    }

    /// Convenience constructor for a replace.
    pub fn replace(feature: impl Into<String>, value: impl Into<String>) -> Self {
        Self { op: AttributeOp::Replace, feature: feature.into(), value: value.into() }
    }
}

/// Output of one unit of extraction work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Identity the attributes belong to
    pub hash: String,
    /// Updates to apply
    pub attributes: Vec<Attribute>,
}

/// Input of one unit of extraction work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    /// Identity, empty when the identity is what the job computes
    pub hash: String,
    /// Benchmark file
    pub path: PathBuf,
}

impl Job {
    /// Create a job.
    pub fn new(hash: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { hash: hash.into(), path: path.into() }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hash.is_empty() {
            write!(f, "{}", self.path.display())
        } else {
            write!(f, "{} ({})", self.hash, self.path.display())
        }
    }
}

/// Aggregate applied when several values resolve for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collapse {
    /// Concatenate all distinct values
    #[default]
    GroupConcat,
    /// Pick the smallest value
    Min,
    /// Pick the largest value
    Max,
}

impl Collapse {
    /// SQL aggregate function name.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::GroupConcat => "GROUP_CONCAT",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

impl FromStr for Collapse {
    type Err = BenchDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "group_concat" | "concat" => Ok(Self::GroupConcat),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(BenchDbError::InvalidConfig(format!("Unknown collapse function: {other}"))),
        }
    }
}

/// Join used for feature tables sharing the anchor's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Keep anchor rows without a matching value
    #[default]
    Left,
    /// Drop anchor rows without a matching value
    Inner,
}

impl JoinKind {
    /// SQL keyword.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Inner => "INNER",
        }
    }
}

impl FromStr for JoinKind {
    type Err = BenchDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "inner" => Ok(Self::Inner),
            other => Err(BenchDbError::InvalidConfig(format!("Unknown join type: {other}"))),
        }
    }
}

/// Summary of a feature group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    /// Feature name
    pub name: String,
    /// Owning table
    pub table: String,
    /// Unique or multi-valued
    pub unique: bool,
    /// Default of a unique feature
    pub default: Option<String>,
    /// View or imported column
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Number of stored values (non-default for unique features)
    pub entries: usize,
}

/// Summary of a database.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    /// Database name derived from the file name
    pub name: String,
    /// Hash context
    pub context: String,
    /// Physical tables and views holding features
    pub tables: Vec<String>,
    /// Feature names
    pub features: Vec<String>,
}
