//! Document path access and condition matching for JSON documents.
//!
//! Conditions use the document-store dialect accepted in the `conditions` query
//! parameter: plain values mean equality (membership when the stored value is an array),
//! and operator objects combine `$in $nin $ne $gt $gte $lt $lte $exists`. Top-level
//! `$and`, `$or` and `$nor` take lists of nested conditions. Paths may be dotted.

use sea_orm::DbErr;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::{Conditions, ModelError};

// ============================================================================
// Path access
// ============================================================================

/// Value at a dotted path
#[must_use]
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set the value at a dotted path, creating intermediate objects
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Remove the value at a dotted path, returning it
pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => doc.as_object_mut()?.remove(path),
        Some((parent, leaf)) => {
            let mut current = doc;
            for segment in parent.split('.') {
                current = current.as_object_mut()?.get_mut(segment)?;
            }
            current.as_object_mut()?.remove(leaf)
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Rank of a value's type in the cross-type sort order
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values, used for sorting
#[must_use]
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| cmp_values(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Equality where `1` and `1.0` are the same number
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Equality that also matches array members
fn matches_value(stored: Option<&Value>, expected: &Value) -> bool {
    match stored {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn compare_with(stored: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    let check = |value: &Value| {
        type_rank(value) == type_rank(expected) && accept(cmp_values(value, expected))
    };
    match stored {
        None => false,
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(check),
        Some(value) => check(value),
    }
}

// ============================================================================
// Matching
// ============================================================================

fn unsupported(operator: &str) -> ModelError {
    ModelError::Database(DbErr::Custom(format!("unknown operator: {operator}")))
}

fn list<'a>(operator: &str, value: &'a Value) -> Result<&'a Vec<Value>, ModelError> {
    value
        .as_array()
        .ok_or_else(|| ModelError::Database(DbErr::Custom(format!("{operator} needs an array"))))
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn matches_operators(stored: Option<&Value>, operators: &Map<String, Value>) -> Result<bool, ModelError> {
    for (operator, operand) in operators {
        let ok = match operator.as_str() {
            "$eq" => matches_value(stored, operand),
            "$ne" => !matches_value(stored, operand),
            "$in" => list(operator, operand)?.iter().any(|v| matches_value(stored, v)),
            "$nin" => !list(operator, operand)?.iter().any(|v| matches_value(stored, v)),
            "$gt" => compare_with(stored, operand, Ordering::is_gt),
            "$gte" => compare_with(stored, operand, Ordering::is_ge),
            "$lt" => compare_with(stored, operand, Ordering::is_lt),
            "$lte" => compare_with(stored, operand, Ordering::is_le),
            "$exists" => stored.is_some() == operand.as_bool().unwrap_or(true),
            other => return Err(unsupported(other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether `doc` satisfies `conditions`
///
/// # Errors
///
/// Returns a database error for operators the matcher does not understand.
pub fn matches(doc: &Value, conditions: &Conditions) -> Result<bool, ModelError> {
    for (key, expected) in conditions {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for nested in list(key, expected)? {
                    all &= matches(doc, nested.as_object().ok_or_else(|| unsupported(key))?)?;
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for nested in list(key, expected)? {
                    any |= matches(doc, nested.as_object().ok_or_else(|| unsupported(key))?)?;
                }
                if key == "$or" { any } else { !any }
            }
            other if other.starts_with('$') => return Err(unsupported(other)),
            path => {
                let stored = get_path(doc, path);
                match expected {
                    Value::Object(operators) if is_operator_object(expected) => {
                        matches_operators(stored, operators)?
                    }
                    _ => matches_value(stored, expected),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}
