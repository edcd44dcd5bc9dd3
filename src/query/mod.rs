//! Filter language and its compilation to SQL.
//!
//! A filter such as `variables > 100 and family = hardware` is parsed into a
//! [`Query`] tree, every referenced feature becomes a node of a [`JoinGraph`]
//! and [`QueryBuilder`] renders the whole thing as one `SELECT`.

mod ast;
mod builder;

pub use ast::{ArithOp, BoolOp, CmpOp, Query, StringOp, Term};
pub use builder::{
    CompiledQuery, FeatureLocation, FeatureResolver, JoinEdge, JoinGraph, NameResolver,
    QueryBuilder,
};
pub use grammar::{FilterParser, Rule};

mod grammar {
    #![allow(missing_docs)]

    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "query/grammar.pest"]
    pub struct FilterParser;
}
