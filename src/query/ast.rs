//! Abstract syntax of filter expressions and its construction from the
//! pest parse tree.

use std::fmt;

use pest::iterators::{Pair, Pairs};
use pest::Parser;

use super::{FilterParser, Rule};
use crate::error::{BenchDbError, Result};

/// Boolean connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// Both sides hold
    And,
    /// Either side holds
    Or,
}

/// Operator of a string constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `like`, `%` allowed at either end of the pattern
    Like,
    /// `unlike`, the negation of `like`
    Unlike,
}

/// Operator of an arithmetic comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
}

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// Arithmetic operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Feature reference, compared numerically
    Column(String),
    /// Numeric literal, kept verbatim
    Constant(String),
    /// Parenthesized binary expression
    Binary {
        /// Left operand
        left: Box<Term>,
        /// Operator
        op: ArithOp,
        /// Right operand
        right: Box<Term>,
    },
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// `left and right`, `left or right`
    Bool {
        /// Left operand
        left: Box<Query>,
        /// Connective
        op: BoolOp,
        /// Right operand
        right: Box<Query>,
    },
    /// `( query )`
    Bracket(Box<Query>),
    /// `column op text`
    Str {
        /// Feature reference
        column: String,
        /// Operator
        op: StringOp,
        /// Literal or pattern
        text: String,
    },
    /// `term op term`
    Arith {
        /// Left operand
        left: Term,
        /// Comparison
        op: CmpOp,
        /// Right operand
        right: Term,
    },
}

impl Query {
    /// Parse a filter expression; blank input yields `None`.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let mut pairs = FilterParser::parse(Rule::start, text)?;
        let start = next_pair(&mut pairs)?;
        for pair in start.into_inner() {
            if pair.as_rule() == Rule::query {
                return build_query(pair).map(Some);
            }
        }
        Ok(None)
    }

    /// Feature references in order of first appearance, without duplicates.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Self::Bool { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::Bracket(inner) => inner.collect_columns(out),
            Self::Str { column, .. } => push_unique(out, column),
            Self::Arith { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }
}

impl Term {
    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Self::Column(name) => push_unique(out, name),
            Self::Constant(_) => {}
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

fn malformed(what: &str) -> BenchDbError {
    BenchDbError::QueryParse(format!("malformed parse tree: {what}"))
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>) -> Result<Pair<'i, Rule>> {
    pairs.next().ok_or_else(|| malformed("missing node"))
}

fn build_query(pair: Pair<'_, Rule>) -> Result<Query> {
    let mut inner = pair.into_inner();
    let mut left = build_atom(next_pair(&mut inner)?)?;
    while let Some(qop) = inner.next() {
        let op = if qop.as_str().eq_ignore_ascii_case("and") { BoolOp::And } else { BoolOp::Or };
        let right = build_atom(next_pair(&mut inner)?)?;
        left = Query::Bool { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn build_atom(pair: Pair<'_, Rule>) -> Result<Query> {
    match pair.as_rule() {
        Rule::bracket => {
            let query = build_query(next_pair(&mut pair.into_inner())?)?;
            Ok(Query::Bracket(Box::new(query)))
        }
        Rule::sconstraint => {
            let mut inner = pair.into_inner();
            let column = next_pair(&mut inner)?.as_str().to_string();
            let op = match next_pair(&mut inner)?.as_str() {
                "=" => StringOp::Eq,
                "!=" => StringOp::Ne,
                kw if kw.eq_ignore_ascii_case("like") => StringOp::Like,
                _ => StringOp::Unlike,
            };
            let text = next_pair(&mut inner)?.as_str().to_string();
            Ok(Query::Str { column, op, text })
        }
        Rule::aconstraint => {
            let mut inner = pair.into_inner();
            let left = build_term(next_pair(&mut inner)?)?;
            let op = match next_pair(&mut inner)?.as_str() {
                "=" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                "<" => CmpOp::Lt,
                ">" => CmpOp::Gt,
                "<=" => CmpOp::Le,
                ">=" => CmpOp::Ge,
                other => return Err(malformed(other)),
            };
            let right = build_term(next_pair(&mut inner)?)?;
            Ok(Query::Arith { left, op, right })
        }
        other => Err(malformed(&format!("{other:?}"))),
    }
}

fn build_term(pair: Pair<'_, Rule>) -> Result<Term> {
    match pair.as_rule() {
        Rule::colname => Ok(Term::Column(pair.as_str().to_string())),
        Rule::number => Ok(Term::Constant(pair.as_str().to_string())),
        Rule::binary => {
            let mut inner = pair.into_inner();
            let left = build_term(next_pair(&mut inner)?)?;
            let op = match next_pair(&mut inner)?.as_str() {
                "+" => ArithOp::Add,
                "-" => ArithOp::Sub,
                "*" => ArithOp::Mul,
                "/" => ArithOp::Div,
                other => return Err(malformed(other)),
            };
            let right = build_term(next_pair(&mut inner)?)?;
            Ok(Term::Binary { left: Box::new(left), op, right: Box::new(right) })
        }
        other => Err(malformed(&format!("{other:?}"))),
    }
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "AND",
            Self::Or => "OR",
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        })
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        })
    }
}

impl StringOp {
    /// SQL operator this lowers to.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Like => "LIKE",
            Self::Unlike => "NOT LIKE",
        }
    }
}
