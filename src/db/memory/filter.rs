//! Query filter evaluation for the in-memory backend
//!
//! Covers the subset of the MongoDB query language that application code
//! typically sends through the CRUD helpers: implicit equality, dotted paths,
//! comparison operators, `$in`/`$nin`, `$exists`, and `$and`/`$or`.
//!
//! A path segment that is not a number fans out across an array of
//! sub-documents, so `items.name` matches when any element's `name` does.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::types::DriverError;

/// Check whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, DriverError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(DriverError::backend(format!(
                    "unknown top level operator: {}",
                    op
                )))
            }
            path => field_matches(&resolve(doc, path), condition)?,
        };

        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Resolve a dotted field path.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Every value a dotted path reaches, fanning out across arrays of
/// sub-documents.
fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();
    if let Some((head, rest)) = parts.split_first() {
        if let Some(value) = doc.get(*head) {
            descend(value, rest, &mut found);
        }
    }
    found
}

fn descend<'a>(value: &'a Bson, parts: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = parts.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*head) {
                descend(next, rest, found);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = items.get(index) {
                    descend(next, rest, found);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    descend(item, parts, found);
                }
            }
        },
        _ => {}
    }
}

/// Equality as the server applies it: numbers compare by value across
/// numeric types, everything else structurally.
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> Result<Vec<&'a Document>, DriverError> {
    let items = match condition {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(DriverError::backend(format!(
                "{} must be a nonempty array",
                op
            )))
        }
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(DriverError::backend(format!(
                "{} entries must be documents",
                op
            ))),
        })
        .collect()
}

fn field_matches(values: &[&Bson], condition: &Bson) -> Result<bool, DriverError> {
    match condition {
        Bson::Document(ops) if is_operator_doc(ops) => {
            for (op, arg) in ops {
                if !operator_matches(values, op, arg)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        target => Ok(any_value(values, |v| value_eq(v, target))),
    }
}

/// `check` against each reached value, or against "missing" when none was.
fn any_value(values: &[&Bson], check: impl Fn(Option<&Bson>) -> bool) -> bool {
    if values.is_empty() {
        check(None)
    } else {
        values.iter().any(|v| check(Some(*v)))
    }
}

fn is_operator_doc(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn operator_matches(values: &[&Bson], op: &str, arg: &Bson) -> Result<bool, DriverError> {
    let ok = match op {
        "$eq" => any_value(values, |v| value_eq(v, arg)),
        "$ne" => !any_value(values, |v| value_eq(v, arg)),
        "$gt" => any_value(values, |v| value_cmp(v, arg, |o| o == Ordering::Greater)),
        "$gte" => any_value(values, |v| value_cmp(v, arg, |o| o != Ordering::Less)),
        "$lt" => any_value(values, |v| value_cmp(v, arg, |o| o == Ordering::Less)),
        "$lte" => any_value(values, |v| value_cmp(v, arg, |o| o != Ordering::Greater)),
        "$in" => {
            let candidates = in_list(op, arg)?;
            any_value(values, |v| candidates.iter().any(|c| value_eq(v, c)))
        }
        "$nin" => {
            let candidates = in_list(op, arg)?;
            !any_value(values, |v| candidates.iter().any(|c| value_eq(v, c)))
        }
        "$exists" => !values.is_empty() == truthy(arg),
        other => {
            return Err(DriverError::backend(format!(
                "unknown operator: {}",
                other
            )))
        }
    };
    Ok(ok)
}

fn in_list<'a>(op: &str, arg: &'a Bson) -> Result<&'a [Bson], DriverError> {
    match arg {
        Bson::Array(candidates) => Ok(candidates.as_slice()),
        _ => Err(DriverError::backend(format!("{} needs an array", op))),
    }
}

/// A missing field equals null; an array field equals any of its elements.
fn value_eq(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => {
            items.iter().any(|item| bson_eq(item, target))
        }
        Some(v) => bson_eq(v, target),
    }
}

fn value_cmp(value: Option<&Bson>, target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, target).is_some_and(&accept)),
        Some(v) => compare(v, target).is_some_and(accept),
    }
}

/// Ordering between two values of the same kind; `None` across kinds.
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => Some((x.time, x.increment).cmp(&(y.time, y.increment))),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}
