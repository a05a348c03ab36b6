//! Pure mutation of hierarchical JSON content at dotted paths.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::{OpKind, Operation};

/// Why a content mutation was rejected. The document is untouched either way.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    /// A path segment is present but is a scalar that cannot be traversed.
    #[error("cannot traverse into `{0}`")]
    Path(String),
    /// The mutation itself was malformed.
    #[error("{0}")]
    Mutate(String),
}

/// Apply a single operation to `content` in place.
///
/// The path is split on `.`; missing intermediate keys are created as empty
/// mappings. The final segment is edited according to the operation kind and
/// the shape of the value found there: sequences are spliced, strings are
/// spliced at character offsets, anything else is assigned or removed. Shape
/// mismatches fall through to the scalar branch rather than erroring.
pub fn apply(content: &mut Value, op: &Operation) -> Result<(), ContentError> {
    if op.path.is_empty() {
        return Err(ContentError::Path(String::new()));
    }
    let segments: Vec<&str> = op.path.split('.').collect();
    let key = segments[segments.len() - 1];
    let mut parent = content;
    for segment in &segments[..segments.len() - 1] {
        parent = descend(parent, segment)?;
    }
    mutate(parent, key, op)
}

/// Walk one intermediate segment, creating empty mappings as needed.
fn descend<'a>(value: &'a mut Value, segment: &str) -> Result<&'a mut Value, ContentError> {
    match value {
        Value::Object(map) => Ok(map
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = parse_index(segment)?;
            items
                .get_mut(index)
                .ok_or_else(|| ContentError::Path(segment.to_owned()))
        }
        _ => Err(ContentError::Path(segment.to_owned())),
    }
}

fn mutate(parent: &mut Value, key: &str, op: &Operation) -> Result<(), ContentError> {
    match parent {
        Value::Object(map) => {
            match op.kind {
                OpKind::Insert => {
                    let value = required_value(op)?;
                    let slot = map.remove(key);
                    map.insert(key.to_owned(), insert_into(slot, op.position, value));
                }
                OpKind::Update => {
                    let value = required_value(op)?;
                    map.insert(key.to_owned(), value);
                }
                OpKind::Delete => {
                    if let Some(kept) = delete_from(map.remove(key), op.position, op.length) {
                        map.insert(key.to_owned(), kept);
                    }
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(key)?;
            match op.kind {
                OpKind::Insert => {
                    let value = required_value(op)?;
                    if index < items.len() {
                        let slot = items[index].take();
                        items[index] = insert_into(Some(slot), op.position, value);
                    } else {
                        items.push(value);
                    }
                }
                OpKind::Update => {
                    let value = required_value(op)?;
                    if index < items.len() {
                        items[index] = value;
                    } else {
                        items.push(value);
                    }
                }
                OpKind::Delete => {
                    if index < items.len() {
                        let slot = items[index].take();
                        match delete_from(Some(slot), op.position, op.length) {
                            Some(kept) => items[index] = kept,
                            None => {
                                items.remove(index);
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        _ => Err(ContentError::Path(key.to_owned())),
    }
}

fn required_value(op: &Operation) -> Result<Value, ContentError> {
    op.value
        .clone()
        .ok_or_else(|| ContentError::Mutate(format!("{:?} operation requires a value", op.kind)))
}

fn parse_index(segment: &str) -> Result<usize, ContentError> {
    segment
        .parse()
        .map_err(|_| ContentError::Path(segment.to_owned()))
}

/// Insert `value` into the slot: splice sequences and strings, assign the rest.
fn insert_into(slot: Option<Value>, position: Option<usize>, value: Value) -> Value {
    match (slot, value) {
        (Some(Value::Array(mut items)), value) => {
            let at = position.unwrap_or(0).min(items.len());
            items.insert(at, value);
            Value::Array(items)
        }
        (Some(Value::String(text)), Value::String(addition)) => {
            Value::String(splice_text(&text, position.unwrap_or(0), &addition))
        }
        (_, value) => value,
    }
}

/// Delete from the slot; `None` means the key itself goes away.
fn delete_from(slot: Option<Value>, position: Option<usize>, length: Option<usize>) -> Option<Value> {
    match slot {
        Some(Value::Array(mut items)) => {
            let start = position.unwrap_or(0).min(items.len());
            let count = length.unwrap_or(1).min(items.len() - start);
            items.drain(start..start + count);
            Some(Value::Array(items))
        }
        Some(Value::String(text)) => Some(Value::String(cut_text(
            &text,
            position.unwrap_or(0),
            length.unwrap_or(1),
        ))),
        _ => None,
    }
}

fn splice_text(text: &str, at: usize, addition: &str) -> String {
    let byte_at = char_boundary(text, at);
    let mut out = String::with_capacity(text.len() + addition.len());
    out.push_str(&text[..byte_at]);
    out.push_str(addition);
    out.push_str(&text[byte_at..]);
    out
}

fn cut_text(text: &str, start: usize, count: usize) -> String {
    let from = char_boundary(text, start);
    let to = char_boundary(text, start.saturating_add(count));
    format!("{}{}", &text[..from], &text[to..])
}

/// Byte offset of the `n`th character, clamped to the end of the string.
fn char_boundary(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Compact, stable digest of content for conflict-detection equality.
///
/// Rolling 32-bit hash of the canonical stringification, rendered in base 36.
/// Not cryptographic; collisions only risk a false "no conflict", which the
/// revision comparison separately guards.
pub fn digest(content: &Value) -> String {
    let canonical = content.to_string();
    let mut hash: i32 = 0;
    for c in canonical.chars() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(c as i32);
    }
    to_base36(i64::from(hash).unsigned_abs())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = String::new();
    while n > 0 {
        out.insert(0, DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}
