// SPDX-License-Identifier: MIT

//! Guard expression parser
//!
//! Recursive descent over the raw string: `or` binds loosest, then `and`,
//! then the `not` prefix, then a single comparison; parentheses group.
//! Keyword and operator scanning yields byte offsets via `char_indices`,
//! so expressions over non-ASCII keys and literals split correctly.

use super::{CompareOp, Expression, Literal};
use crate::error::EngineError;

// Longest token first so `>=` is not read as `>`
const COMPARE_TOKENS: [(&str, CompareOp); 7] = [
    ("!=", CompareOp::NotEq),
    (">=", CompareOp::Gte),
    ("<=", CompareOp::Lte),
    ("==", CompareOp::Eq),
    (">", CompareOp::Gt),
    ("<", CompareOp::Lt),
    (" contains ", CompareOp::Contains),
];

/// Parse a guard expression string into an [`Expression`]
pub fn parse(input: &str) -> Result<Expression, EngineError> {
    let input = input.trim();

    match input {
        "" => return Err(EngineError::validation("empty guard expression")),
        "true" => return Ok(Expression::True),
        "false" => return Ok(Expression::False),
        _ => {}
    }

    if let Some(inner) = strip_grouping(input) {
        return parse(inner);
    }

    if let Some((left, right)) = split_top_level(input, " or ") {
        return Ok(Expression::Or(
            Box::new(parse(left)?),
            Box::new(parse(right)?),
        ));
    }
    if let Some((left, right)) = split_top_level(input, " and ") {
        return Ok(Expression::And(
            Box::new(parse(left)?),
            Box::new(parse(right)?),
        ));
    }
    if let Some(rest) = input.strip_prefix("not ") {
        return Ok(Expression::Not(Box::new(parse(rest)?)));
    }

    parse_comparison(input)
}

/// Byte offsets of characters sitting outside quoted strings and
/// parenthesised groups. A quote closes only on its own kind.
fn top_level_offsets(input: &str) -> impl Iterator<Item = usize> + '_ {
    let mut quote: Option<char> = None;
    let mut depth = 0u32;
    input.char_indices().filter_map(move |(offset, c)| {
        if let Some(open) = quote {
            if c == open {
                quote = None;
            }
            return None;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => return Some(offset),
            _ => {}
        }
        None
    })
}

/// Split at the first top-level occurrence of `keyword`.
fn split_top_level<'a>(input: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    top_level_offsets(input)
        .find(|&offset| input[offset..].starts_with(keyword))
        .map(|offset| (&input[..offset], &input[offset + keyword.len()..]))
}

/// Strip one pair of parentheses wrapping the whole expression.
/// `(a) and (b)` has top-level characters between the groups and is left
/// alone.
fn strip_grouping(input: &str) -> Option<&str> {
    if !(input.starts_with('(') && input.ends_with(')')) {
        return None;
    }
    if top_level_offsets(input).next().is_some() {
        return None;
    }
    Some(input[1..input.len() - 1].trim())
}

fn parse_comparison(input: &str) -> Result<Expression, EngineError> {
    for offset in top_level_offsets(input) {
        for (token, op) in COMPARE_TOKENS {
            if input[offset..].starts_with(token) {
                let left = input[..offset].trim();
                if left.is_empty() {
                    break;
                }
                let right = parse_literal(input[offset + token.len()..].trim())?;
                return Ok(Expression::Compare {
                    left: left.to_string(),
                    op,
                    right,
                });
            }
        }
    }

    Err(EngineError::validation(format!(
        "could not parse guard expression: {}",
        input
    )))
}

fn parse_literal(input: &str) -> Result<Literal, EngineError> {
    match input {
        "null" => return Ok(Literal::Null),
        "true" => return Ok(Literal::Boolean(true)),
        "false" => return Ok(Literal::Boolean(false)),
        _ => {}
    }

    for quote in ['\'', '"'] {
        if let Some(inner) = input
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(Literal::String(inner.to_string()));
        }
    }

    if let Ok(n) = input.parse::<f64>() {
        return Ok(Literal::Number(n));
    }

    Err(EngineError::validation(format!(
        "could not parse literal: {}",
        input
    )))
}
