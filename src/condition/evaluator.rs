// SPDX-License-Identifier: MIT

//! Guard expression evaluator
//!
//! Pure: reads the state, never writes it. A type mismatch between a state
//! value and the literal makes the comparison false rather than an error,
//! so a guard over a not-yet-written key simply stays closed.

use std::cmp::Ordering;

use super::{CompareOp, Expression, Literal};
use crate::state::StateContainer;
use serde_json::Value;

/// Evaluate a guard expression against the live state
pub fn evaluate(expr: &Expression, state: &StateContainer) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::And(left, right) => evaluate(left, state) && evaluate(right, state),
        Expression::Or(left, right) => evaluate(left, state) || evaluate(right, state),
        Expression::Not(inner) => !evaluate(inner, state),
        Expression::Compare { left, op, right } => compare(state.get_path(left), op, right),
    }
}

fn compare(actual: Option<&Value>, op: &CompareOp, expected: &Literal) -> bool {
    match op {
        CompareOp::Eq => literal_matches(actual, expected),
        CompareOp::NotEq => !literal_matches(actual, expected),
        CompareOp::Contains => contains(actual, expected),
        ordering_op => match numeric_ordering(actual, expected) {
            Some(ordering) => ordering_holds(ordering_op, ordering),
            None => false,
        },
    }
}

/// Equality between a state value and a literal. An absent path counts as
/// null.
fn literal_matches(actual: Option<&Value>, expected: &Literal) -> bool {
    let Some(value) = actual else {
        return matches!(expected, Literal::Null);
    };
    match expected {
        Literal::Null => value.is_null(),
        Literal::String(s) => value.as_str() == Some(s.as_str()),
        Literal::Boolean(b) => value.as_bool() == Some(*b),
        Literal::Number(n) => value.as_f64().is_some_and(|f| numbers_equal(f, *n)),
    }
}

fn numeric_ordering(actual: Option<&Value>, expected: &Literal) -> Option<Ordering> {
    let Literal::Number(rhs) = expected else {
        return None;
    };
    actual?.as_f64()?.partial_cmp(rhs)
}

fn ordering_holds(op: &CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Gte => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Lte => ordering != Ordering::Greater,
        _ => false,
    }
}

/// Substring match on strings, element membership on arrays.
fn contains(actual: Option<&Value>, expected: &Literal) -> bool {
    match actual {
        Some(Value::String(s)) => match expected {
            Literal::String(needle) => s.contains(needle.as_str()),
            _ => false,
        },
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| literal_matches(Some(item), expected)),
        _ => false,
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < f64::EPSILON
}
