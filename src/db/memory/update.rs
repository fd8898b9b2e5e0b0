//! Update operator application for the in-memory backend
//!
//! Dotted paths step into sub-documents and, with a numeric segment, into one
//! array element (`tags.0`). Positional operators such as `items.$.name` are
//! not supported.

use bson::{Bson, Document};

use super::filter::{as_f64, bson_eq, lookup};
use crate::types::DriverError;

/// Apply an operator update (`$set`, `$unset`, `$inc`) to `doc`.
///
/// Returns whether the document changed. The document is left untouched when
/// the update is rejected.
pub fn apply(doc: &mut Document, update: &Document) -> Result<bool, DriverError> {
    validate(update)?;

    let mut staged = doc.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DriverError::backend(format!(
                "Modifiers operate on fields but we found type {:?} instead",
                fields.element_type()
            )));
        };

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(DriverError::backend(
                    "Performing an update on the path '_id' would modify the immutable field '_id'",
                ));
            }

            match op.as_str() {
                "$set" => set_path(&mut staged, path, value.clone())?,
                "$unset" => unset_path(&mut staged, path),
                "$inc" => {
                    let next = increment(lookup(&staged, path), value, path)?;
                    set_path(&mut staged, path, next)?;
                }
                _ => unreachable!("validated above"),
            }
        }
    }

    let changed = staged != *doc;
    *doc = staged;
    Ok(changed)
}

fn validate(update: &Document) -> Result<(), DriverError> {
    if update.is_empty() {
        return Err(DriverError::backend("update document must not be empty"));
    }
    for op in update.keys() {
        match op.as_str() {
            "$set" | "$unset" | "$inc" => {}
            other if other.starts_with('$') => {
                return Err(DriverError::backend(format!(
                    "Unknown modifier: {}",
                    other
                )))
            }
            _ => {
                return Err(DriverError::backend(
                    "update document requires atomic operators",
                ))
            }
        }
    }
    Ok(())
}

fn increment(current: Option<&Bson>, by: &Bson, path: &str) -> Result<Bson, DriverError> {
    let non_numeric = || {
        DriverError::backend(format!(
            "Cannot apply $inc to a value of non-numeric type at '{}'",
            path
        ))
    };

    if as_f64(by).is_none() {
        return Err(DriverError::backend("Cannot increment with non-numeric argument"));
    }

    let Some(current) = current else {
        return Ok(by.clone());
    };

    let overflow = || {
        DriverError::backend(format!(
            "Failed to apply $inc operations to current value ({}) at '{}': integer overflow",
            current, path
        ))
    };
    let add_i64 = |a: i64, b: i64| a.checked_add(b).map(Bson::Int64).ok_or_else(&overflow);

    let next = match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => add_i64(i64::from(*a), *b)?,
        (Bson::Int64(a), Bson::Int32(b)) => add_i64(*a, i64::from(*b))?,
        (Bson::Int64(a), Bson::Int64(b)) => add_i64(*a, *b)?,
        (a, b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => return Err(non_numeric()),
        },
    };
    Ok(next)
}

/// Equal values of the same type are left alone, so a numeric type change
/// alone doesn't count as a modification.
fn same(old: &Bson, value: &Bson) -> bool {
    bson_eq(old, value) && old.element_type() == value.element_type()
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), DriverError> {
    match path.split_once('.') {
        None => {
            if doc.get(path).is_some_and(|old| same(old, &value)) {
                return Ok(());
            }
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                Bson::Array(items) => set_element(items, head, rest, value),
                other => Err(DriverError::backend(format!(
                    "Cannot create field '{}' in element {{{}: {}}}",
                    rest, head, other
                ))),
            }
        }
    }
}

/// Set `path` inside the array field `field`; the first segment is the index.
/// Setting past the end pads the array with nulls.
fn set_element(
    items: &mut Vec<Bson>,
    field: &str,
    path: &str,
    value: Bson,
) -> Result<(), DriverError> {
    let (segment, rest) = match path.split_once('.') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (path, None),
    };
    let index: usize = segment.parse().map_err(|_| {
        DriverError::backend(format!(
            "Cannot create field '{}' in array '{}'",
            segment, field
        ))
    })?;

    if items.len() <= index {
        items.resize(index + 1, Bson::Null);
    }
    let slot = &mut items[index];

    match rest {
        None => {
            if !same(slot, &value) {
                *slot = value;
            }
            Ok(())
        }
        Some(rest) => {
            if *slot == Bson::Null {
                *slot = Bson::Document(Document::new());
            }
            match slot {
                Bson::Document(inner) => set_path(inner, rest, value),
                Bson::Array(inner) => set_element(inner, segment, rest, value),
                other => Err(DriverError::backend(format!(
                    "Cannot create field '{}' in element {{{}: {}}}",
                    rest, segment, other
                ))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(inner)) => unset_path(inner, rest),
            Some(Bson::Array(items)) => unset_element(items, rest),
            _ => {}
        },
    }
}

// Unsetting an array element nulls it rather than shifting the rest
fn unset_element(items: &mut [Bson], path: &str) {
    let (segment, rest) = match path.split_once('.') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (path, None),
    };
    let Some(slot) = segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) else {
        return;
    };

    match (rest, slot) {
        (None, slot) => *slot = Bson::Null,
        (Some(rest), Bson::Document(inner)) => unset_path(inner, rest),
        (Some(rest), Bson::Array(inner)) => unset_element(inner, rest),
        _ => {}
    }
}
