//! benchdb - Benchmark Attribute Store
//!
//! A Rust library for accumulating facts about benchmark instance files in a
//! schema-flexible SQLite store and querying them with a small filter
//! language.
//!
//! # Features
//!
//! - Features created on demand as unique columns or multi-valued tables
//! - Filter expressions compiled into one SQL statement with automatic joins
//! - Cross-context joins through translator tables
//! - Parallel feature extraction with a single writer
//! - CSV files usable as read-only feature sources

/// High-level store operations
pub mod api;
/// Configuration management
pub mod config;
/// Hash contexts
pub mod context;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Benchmark identities
pub mod identity;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Filter language and SQL compilation
pub mod query;
/// Extraction runner
pub mod runner;
/// Dynamic schema engine
pub mod schema;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use api::BenchDb;
pub use config::AppConfig;
pub use context::Context;
pub use db::{Database, StorageHandle};
pub use error::{BenchDbError, Result};
pub use identity::{IdentityProvider, Sha256Identity};
pub use models::{Attribute, AttributeOp, Collapse, FeatureInfo, JoinKind, Job, ResultRecord};
pub use query::QueryBuilder;
pub use runner::{CommandExtractor, Extractor, Limits, Outcome, RunReport, Runner};
pub use schema::Schema;
