use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::FilterError;
use super::types::{Condition, FilterOp};

pub struct FilterWhere;

impl FilterWhere {
    /// Render conditions as PostgREST query pairs. Top-level conditions are
    /// ANDed; each `Or` group becomes one `or=(...)` pair.
    pub fn generate(conditions: &[Condition]) -> Result<Vec<(String, String)>, FilterError> {
        let mut pairs = Vec::with_capacity(conditions.len());
        for condition in conditions {
            match condition {
                Condition::Field { column, op, value } => {
                    validate_column(column)?;
                    pairs.push((column.clone(), format!("{}.{}", op.as_str(), Self::render_value(*op, value)?)));
                }
                Condition::Or(inner) => {
                    pairs.push(("or".to_string(), format!("({})", Self::generate_group(inner)?)));
                }
            }
        }
        Ok(pairs)
    }

    fn generate_group(conditions: &[Condition]) -> Result<String, FilterError> {
        if conditions.is_empty() {
            return Err(FilterError::InvalidOperatorData("or requires at least one condition".to_string()));
        }
        let mut parts = Vec::with_capacity(conditions.len());
        for condition in conditions {
            match condition {
                Condition::Field { column, op, value } => {
                    validate_column(column)?;
                    let rendered = Self::render_value(*op, value)?;
                    parts.push(format!("{}.{}.{}", column, op.as_str(), quote_group_value(&rendered)));
                }
                Condition::Or(inner) => parts.push(format!("or({})", Self::generate_group(inner)?)),
            }
        }
        Ok(parts.join(","))
    }

    fn render_value(op: FilterOp, value: &Value) -> Result<String, FilterError> {
        match (op, value) {
            (FilterOp::Is, Value::Null) => Ok("null".to_string()),
            (FilterOp::Is, Value::Bool(b)) => Ok(b.to_string()),
            (FilterOp::Is, other) => Err(FilterError::InvalidOperatorData(format!("is accepts null or boolean, got {}", other))),
            (_, Value::String(s)) => Ok(s.clone()),
            (_, Value::Number(n)) => Ok(n.to_string()),
            (_, Value::Bool(b)) => Ok(b.to_string()),
            (_, Value::Null) => Err(FilterError::InvalidOperatorData(format!("{} cannot compare against null; use is", op.as_str()))),
            (_, other) => Err(FilterError::InvalidOperatorData(format!("unsupported filter value: {}", other))),
        }
    }

    /// Evaluate conditions against a JSON row (all top-level conditions must hold)
    pub fn matches(conditions: &[Condition], row: &Value) -> bool {
        conditions.iter().all(|c| Self::matches_one(c, row))
    }

    fn matches_one(condition: &Condition, row: &Value) -> bool {
        match condition {
            Condition::Or(inner) => inner.iter().any(|c| Self::matches_one(c, row)),
            Condition::Field { column, op, value } => {
                let field = row.get(column).unwrap_or(&Value::Null);
                match op {
                    FilterOp::Is => field == value,
                    // SQL comparisons against NULL are never true
                    _ if field.is_null() => false,
                    FilterOp::Eq => compare_values(field, value) == Some(Ordering::Equal),
                    FilterOp::Neq => compare_values(field, value) != Some(Ordering::Equal),
                    FilterOp::Gt => compare_values(field, value) == Some(Ordering::Greater),
                    FilterOp::Gte => matches!(compare_values(field, value), Some(Ordering::Greater | Ordering::Equal)),
                    FilterOp::Lt => compare_values(field, value) == Some(Ordering::Less),
                    FilterOp::Lte => matches!(compare_values(field, value), Some(Ordering::Less | Ordering::Equal)),
                    FilterOp::Like => match (field.as_str(), value.as_str()) {
                        (Some(f), Some(p)) => like_match(f, p, false),
                        _ => false,
                    },
                    FilterOp::ILike => match (field.as_str(), value.as_str()) {
                        (Some(f), Some(p)) => like_match(f, p, true),
                        _ => false,
                    },
                }
            }
        }
    }
}

pub(crate) fn validate_column(column: &str) -> Result<(), FilterError> {
    let first = match column.chars().next() {
        Some(c) => c,
        None => return Err(FilterError::InvalidColumn("Column name cannot be empty".to_string())),
    };
    if !(first.is_alphabetic() || first == '_') || !column.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", column)));
    }
    Ok(())
}

/// Values inside `or=(...)` must be double-quoted when they contain reserved characters
fn quote_group_value(value: &str) -> String {
    if value.contains(&[',', '(', ')', '"'][..]) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Compare two JSON scalars: timestamps chronologically, numbers numerically,
/// otherwise lexically. Mixed kinds are incomparable.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => {
            match (a.parse::<DateTime<Utc>>(), b.parse::<DateTime<Utc>>()) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(a.cmp(b)),
            }
        }
        // numeric ids sometimes arrive as strings from query parameters
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

/// SQL LIKE with `%` and `_` wildcards
fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (text, pattern): (Vec<char>, Vec<char>) = if case_insensitive {
        (text.to_lowercase().chars().collect(), pattern.to_lowercase().chars().collect())
    } else {
        (text.chars().collect(), pattern.chars().collect())
    };

    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' { p += 1; }
    p == pattern.len()
}
