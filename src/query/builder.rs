//! Lowering of filter expressions into one SQL statement.

use std::fmt;

use tracing::debug;

use super::ast::{Query, Term};
use crate::context::Context;
use crate::error::{BenchDbError, Result};
use crate::models::{Collapse, JoinKind};
use crate::validation::InputValidator;

/// Physical location of a feature as seen by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLocation {
    /// Table or view holding the values
    pub table: String,
    /// Column holding the values
    pub column: String,
    /// Hash namespace of the table
    pub context: Context,
}

impl FeatureLocation {
    /// `table.column`
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

/// Maps feature names to storage locations.
///
/// The compiler only needs naming information; whether the table exists is
/// left to the storage engine executing the statement.
pub trait FeatureResolver {
    /// Locate a feature by name.
    fn locate(&self, feature: &str) -> FeatureLocation;
}

/// Resolver treating every name as its own `(hash, value)` table.
#[derive(Debug, Clone, Copy)]
pub struct NameResolver {
    fallback: Context,
}

impl NameResolver {
    /// Resolver inferring contexts from name prefixes, defaulting to `fallback`.
    #[must_use]
    pub const fn new(fallback: Context) -> Self {
        Self { fallback }
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new(Context::default_context())
    }
}

impl FeatureResolver for NameResolver {
    fn locate(&self, feature: &str) -> FeatureLocation {
        FeatureLocation {
            table: feature.to_string(),
            column: "value".to_string(),
            context: Context::from_name_or(feature, self.fallback),
        }
    }
}

/// One join of the generated statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    /// Joined table
    pub table: String,
    /// Join kind
    pub kind: JoinKind,
    /// Left side of the equality, already qualified
    pub left: String,
    /// Right side of the equality, already qualified
    pub right: String,
}

impl fmt::Display for JoinEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} JOIN {} ON {} = {}", self.kind.sql(), self.table, self.left, self.right)
    }
}

/// Join plan rooted at the anchor (group-by) table.
///
/// Each table is joined at most once. Tables of a foreign context are
/// reached through that context's translator, which is itself joined once.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    anchor: FeatureLocation,
    edges: Vec<JoinEdge>,
    translators: Vec<Context>,
}

impl JoinGraph {
    /// Empty plan over `anchor`.
    #[must_use]
    pub const fn new(anchor: FeatureLocation) -> Self {
        Self { anchor, edges: Vec::new(), translators: Vec::new() }
    }

    /// Make `location`'s table reachable from the anchor.
    pub fn add(&mut self, location: &FeatureLocation, kind: JoinKind) {
        if location.table == self.anchor.table || self.joins(&location.table) {
            return;
        }

        let anchor_hash = format!("{}.hash", self.anchor.table);
        if location.context == self.anchor.context {
            self.edges.push(JoinEdge {
                table: location.table.clone(),
                kind,
                left: anchor_hash,
                right: format!("{}.hash", location.table),
            });
            return;
        }

        let translator = self.anchor.context.translator_to(location.context);
        if !self.translators.contains(&location.context) {
            self.translators.push(location.context);
            self.edges.push(JoinEdge {
                table: translator.clone(),
                kind: JoinKind::Inner,
                left: anchor_hash,
                right: format!("{translator}.hash"),
            });
        }
        self.edges.push(JoinEdge {
            table: location.table.clone(),
            kind,
            left: format!("{translator}.value"),
            right: format!("{}.hash", location.table),
        });
    }

    fn joins(&self, table: &str) -> bool {
        self.edges.iter().any(|e| e.table == table)
    }

    /// Joins in emission order.
    #[must_use]
    pub fn edges(&self) -> &[JoinEdge] {
        &self.edges
    }

    /// Anchor location.
    #[must_use]
    pub const fn anchor(&self) -> &FeatureLocation {
        &self.anchor
    }
}

impl fmt::Display for JoinGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for edge in &self.edges {
            write!(f, " {edge}")?;
        }
        Ok(())
    }
}

/// A rendered statement with its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Values bound to the placeholders, in order
    pub params: Vec<String>,
}

/// Compiles a filter, a hash restriction and a list of resolved features.
///
/// ```ignore
/// let compiled = QueryBuilder::new("local")
///     .filter("variables > 100")
///     .resolve(["family"])
///     .build(&schema)?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    group_by: String,
    filter: Option<String>,
    hashes: Vec<String>,
    excluded: Option<String>,
    resolve: Vec<String>,
    collapse: Collapse,
    join: JoinKind,
}

impl QueryBuilder {
    /// Builder anchored at `group_by`.
    pub fn new(group_by: impl Into<String>) -> Self {
        Self {
            group_by: group_by.into(),
            filter: None,
            hashes: Vec::new(),
            excluded: None,
            resolve: Vec::new(),
            collapse: Collapse::default(),
            join: JoinKind::default(),
        }
    }

    /// Filter expression; blank text means no filter.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Restrict results to these hashes.
    #[must_use]
    pub fn hashes<I, S>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashes = hashes.into_iter().map(Into::into).collect();
        self
    }

    /// Drop anchor rows stored under `hash`.
    #[must_use]
    pub fn exclude_hash(mut self, hash: impl Into<String>) -> Self {
        self.excluded = Some(hash.into());
        self
    }

    /// Features resolved into additional result columns.
    #[must_use]
    pub fn resolve<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolve = features.into_iter().map(Into::into).collect();
        self
    }

    /// Aggregate for resolved features.
    #[must_use]
    pub const fn collapse(mut self, collapse: Collapse) -> Self {
        self.collapse = collapse;
        self
    }

    /// Join kind for feature tables.
    #[must_use]
    pub const fn join(mut self, join: JoinKind) -> Self {
        self.join = join;
        self
    }

    /// Parse the filter and render the statement.
    pub fn build(&self, resolver: &dyn FeatureResolver) -> Result<CompiledQuery> {
        for name in std::iter::once(&self.group_by).chain(&self.resolve) {
            if !InputValidator::is_identifier(name) {
                return Err(BenchDbError::QueryParse(format!("'{name}' is not a feature name")));
            }
        }

        let query = match &self.filter {
            Some(text) => Query::parse(text)?,
            None => None,
        };

        let anchor = resolver.locate(&self.group_by);
        let mut graph = JoinGraph::new(anchor.clone());
        let mut select = vec![anchor.qualified()];

        for feature in &self.resolve {
            let location = resolver.locate(feature);
            select.push(format!("{}(DISTINCT({}))", self.collapse.sql(), location.qualified()));
            graph.add(&location, self.join);
        }

        let mut params = Vec::new();
        let mut predicate = match &query {
            Some(query) => {
                for column in query.columns() {
                    graph.add(&resolver.locate(&column), self.join);
                }
                lower(query, resolver, &mut params)
            }
            None => "1=1".to_string(),
        };

        if !self.hashes.is_empty() {
            let placeholders = vec!["?"; self.hashes.len()].join(", ");
            predicate.push_str(&format!(" AND {}.hash IN ({placeholders})", anchor.table));
            params.extend(self.hashes.iter().cloned());
        }
        if let Some(hash) = &self.excluded {
            predicate.push_str(&format!(" AND {}.hash != ?", anchor.table));
            params.push(hash.clone());
        }

        let sql = format!(
            "SELECT {} FROM {}{graph} WHERE {predicate} GROUP BY {}",
            select.join(", "),
            anchor.table,
            anchor.qualified()
        );
        debug!(sql, params = params.len(), "compiled query");
        Ok(CompiledQuery { sql, params })
    }
}

fn lower(query: &Query, resolver: &dyn FeatureResolver, params: &mut Vec<String>) -> String {
    match query {
        Query::Bool { left, op, right } => {
            let left = lower(left, resolver, params);
            let right = lower(right, resolver, params);
            format!("({left} {op} {right})")
        }
        Query::Bracket(inner) => format!("({})", lower(inner, resolver, params)),
        Query::Str { column, op, text } => {
            params.push(text.clone());
            format!("{} {} ?", resolver.locate(column).qualified(), op.sql())
        }
        Query::Arith { left, op, right } => {
            format!("{} {op} {}", lower_term(left, resolver), lower_term(right, resolver))
        }
    }
}

fn lower_term(term: &Term, resolver: &dyn FeatureResolver) -> String {
    match term {
        Term::Column(name) => format!("CAST({} AS FLOAT)", resolver.locate(name).qualified()),
        Term::Constant(value) => value.clone(),
        Term::Binary { left, op, right } => {
            format!("({} {op} {})", lower_term(left, resolver), lower_term(right, resolver))
        }
    }
}
