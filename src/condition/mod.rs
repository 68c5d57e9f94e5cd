// SPDX-License-Identifier: MIT

//! Guard expression language for edge predicates
//!
//! Edges may carry a `when` expression evaluated against the live state to
//! decide eligibility. Expressions are small and deliberately boring:
//! - `intent == 'search'`
//! - `count < 3`
//! - `intent == 'bug' and priority > 3`
//! - `not done == true`
//!
//! Expressions are parsed once at graph build time; a parse failure is a
//! validation error, never a runtime surprise.

mod evaluator;
mod parser;

pub use evaluator::evaluate;
pub use parser::parse;

/// A parsed guard expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Comparison: left path, operator, literal
    Compare {
        left: String,
        op: CompareOp,
        right: Literal,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    True,
    False,
}

/// Comparison operators
#[derive(Debug, Clone, PartialEq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring match on strings, membership on arrays
    Contains,
}

/// Literal values on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::NotEq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
            CompareOp::Contains => write!(f, "contains"),
        }
    }
}
