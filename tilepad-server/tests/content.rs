//! Tests for the pure content mutator and the content digest.

use serde_json::{Value, json};
use tilepad_server::content::{ContentError, apply, digest};
use tilepad_server::store::{OpKind, Operation};

fn op(
    kind: OpKind,
    path: &str,
    value: Option<Value>,
    position: Option<usize>,
    length: Option<usize>,
) -> Operation {
    Operation {
        id: "test-op".to_owned(),
        client_id: "c1".to_owned(),
        user_id: "u1".to_owned(),
        kind,
        path: path.to_owned(),
        value,
        old_value: None,
        position,
        length,
        timestamp: 0,
        revision: 0,
    }
}

#[test]
fn insert_splices_string_at_character_offset() {
    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Insert, "text", Some(json!("X")), Some(1), None)).unwrap();
    assert_eq!(content, json!({ "text": "aXbc" }));
}

#[test]
fn insert_position_defaults_to_zero() {
    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Insert, "text", Some(json!("X")), None, None)).unwrap();
    assert_eq!(content, json!({ "text": "Xabc" }));
}

#[test]
fn insert_clamps_past_end() {
    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Insert, "text", Some(json!("X")), Some(99), None)).unwrap();
    assert_eq!(content, json!({ "text": "abcX" }));
}

#[test]
fn insert_splices_multibyte_text() {
    let mut content = json!({ "text": "héllo" });
    apply(&mut content, &op(OpKind::Insert, "text", Some(json!("ü")), Some(2), None)).unwrap();
    assert_eq!(content, json!({ "text": "héüllo" }));
}

#[test]
fn insert_splices_sequence() {
    let mut content = json!({ "items": [1, 2, 3] });
    apply(&mut content, &op(OpKind::Insert, "items", Some(json!(9)), Some(1), None)).unwrap();
    assert_eq!(content, json!({ "items": [1, 9, 2, 3] }));
}

#[test]
fn insert_assigns_missing_key() {
    let mut content = json!({});
    apply(&mut content, &op(OpKind::Insert, "title", Some(json!("hi")), None, None)).unwrap();
    assert_eq!(content, json!({ "title": "hi" }));
}

#[test]
fn insert_creates_intermediate_mappings() {
    let mut content = json!({});
    apply(&mut content, &op(OpKind::Insert, "a.b.c", Some(json!(1)), None, None)).unwrap();
    assert_eq!(content, json!({ "a": { "b": { "c": 1 } } }));
}

#[test]
fn insert_non_string_value_into_string_assigns() {
    // Shape mismatch falls through to the scalar branch.
    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Insert, "text", Some(json!(5)), Some(1), None)).unwrap();
    assert_eq!(content, json!({ "text": 5 }));
}

#[test]
fn insert_without_value_is_rejected() {
    let mut content = json!({ "text": "abc" });
    let err = apply(&mut content, &op(OpKind::Insert, "text", None, None, None)).unwrap_err();
    assert!(matches!(err, ContentError::Mutate(_)));
}

#[test]
fn delete_removes_string_span() {
    let mut content = json!({ "text": "abcdef" });
    apply(&mut content, &op(OpKind::Delete, "text", None, Some(1), Some(3))).unwrap();
    assert_eq!(content, json!({ "text": "aef" }));
}

#[test]
fn delete_length_defaults_to_one() {
    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Delete, "text", None, Some(1), None)).unwrap();
    assert_eq!(content, json!({ "text": "ac" }));
}

#[test]
fn delete_past_end_is_noop_on_excess() {
    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Delete, "text", None, Some(2), Some(10))).unwrap();
    assert_eq!(content, json!({ "text": "ab" }));

    let mut content = json!({ "text": "abc" });
    apply(&mut content, &op(OpKind::Delete, "text", None, Some(7), Some(2))).unwrap();
    assert_eq!(content, json!({ "text": "abc" }));
}

#[test]
fn delete_splices_sequence() {
    let mut content = json!({ "items": [1, 2, 3, 4] });
    apply(&mut content, &op(OpKind::Delete, "items", None, Some(1), Some(2))).unwrap();
    assert_eq!(content, json!({ "items": [1, 4] }));
}

#[test]
fn delete_scalar_removes_key() {
    let mut content = json!({ "title": "hi", "count": 3 });
    apply(&mut content, &op(OpKind::Delete, "count", None, None, None)).unwrap();
    assert_eq!(content, json!({ "title": "hi" }));
}

#[test]
fn delete_missing_key_is_noop() {
    let mut content = json!({ "title": "hi" });
    apply(&mut content, &op(OpKind::Delete, "missing", None, None, None)).unwrap();
    assert_eq!(content, json!({ "title": "hi" }));
}

#[test]
fn update_overwrites_unconditionally() {
    let mut content = json!({ "meta": { "title": "old" } });
    apply(&mut content, &op(OpKind::Update, "meta.title", Some(json!("new")), None, None)).unwrap();
    assert_eq!(content, json!({ "meta": { "title": "new" } }));
}

#[test]
fn update_replaces_sequence_element() {
    let mut content = json!({ "items": [1, 2, 3] });
    apply(&mut content, &op(OpKind::Update, "items.1", Some(json!(9)), None, None)).unwrap();
    assert_eq!(content, json!({ "items": [1, 9, 3] }));
}

#[test]
fn path_error_descending_through_scalar() {
    let mut content = json!({ "a": 5 });
    let err = apply(&mut content, &op(OpKind::Insert, "a.b", Some(json!(1)), None, None)).unwrap_err();
    assert!(matches!(err, ContentError::Path(_)));
}

#[test]
fn empty_path_is_invalid() {
    let mut content = json!({});
    let err = apply(&mut content, &op(OpKind::Update, "", Some(json!(1)), None, None)).unwrap_err();
    assert!(matches!(err, ContentError::Path(_)));
}

#[test]
fn insert_then_delete_is_inverse_on_strings() {
    let original = json!({ "text": "hello world" });
    let mut content = original.clone();
    apply(&mut content, &op(OpKind::Insert, "text", Some(json!("XY")), Some(4), None)).unwrap();
    assert_eq!(content, json!({ "text": "hellXYo world" }));
    apply(&mut content, &op(OpKind::Delete, "text", None, Some(4), Some(2))).unwrap();
    assert_eq!(content, original);
}

#[test]
fn digest_is_stable_and_discriminates() {
    let a = json!({ "text": "hello", "n": 3 });
    let b = json!({ "n": 3, "text": "hello" });
    // Canonical stringification: key order does not matter.
    assert_eq!(digest(&a), digest(&b));
    let c = json!({ "text": "hello!", "n": 3 });
    assert_ne!(digest(&a), digest(&c));
    // Base-36 rendering of an absolute value.
    assert!(digest(&a).chars().all(|c| c.is_ascii_alphanumeric()));
}
