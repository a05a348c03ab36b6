//! Tests for operation rebasing and two-replica convergence.

use serde_json::{Value, json};
use tilepad_server::content::apply;
use tilepad_server::ot::transform;
use tilepad_server::store::{OpKind, Operation};

fn insert(client_id: &str, path: &str, position: usize, value: &str, timestamp: u64) -> Operation {
    Operation {
        id: format!("op-{client_id}-{timestamp}"),
        client_id: client_id.to_owned(),
        user_id: client_id.to_owned(),
        kind: OpKind::Insert,
        path: path.to_owned(),
        value: Some(Value::String(value.to_owned())),
        old_value: None,
        position: Some(position),
        length: None,
        timestamp,
        revision: 0,
    }
}

#[test]
fn transform_against_nothing_is_identity() {
    let op = insert("a", "text", 3, "X", 100);
    let rebased = transform(op.clone(), &[]);
    assert_eq!(rebased.position, op.position);
}

#[test]
fn earlier_insert_below_shifts_position() {
    let committed = insert("a", "text", 1, "abc", 100);
    let op = insert("b", "text", 5, "X", 200);
    let rebased = transform(op, &[committed]);
    assert_eq!(rebased.position, Some(8));
}

#[test]
fn earlier_insert_above_leaves_position() {
    let committed = insert("a", "text", 9, "abc", 100);
    let op = insert("b", "text", 5, "X", 200);
    let rebased = transform(op, &[committed]);
    assert_eq!(rebased.position, Some(5));
}

#[test]
fn equal_position_breaks_ties_by_client_id() {
    let committed = insert("a", "text", 5, "X", 100);
    let shifted = transform(insert("b", "text", 5, "Y", 200), std::slice::from_ref(&committed));
    assert_eq!(shifted.position, Some(6));

    let committed = insert("b", "text", 5, "X", 100);
    let unshifted = transform(insert("a", "text", 5, "Y", 200), &[committed]);
    assert_eq!(unshifted.position, Some(5));
}

#[test]
fn later_operations_do_not_shift() {
    let committed = insert("a", "text", 1, "abc", 300);
    let op = insert("b", "text", 5, "X", 200);
    let rebased = transform(op, &[committed]);
    assert_eq!(rebased.position, Some(5));
}

#[test]
fn different_paths_pass_through() {
    let committed = insert("a", "title", 1, "abc", 100);
    let op = insert("b", "text", 5, "X", 200);
    let rebased = transform(op, &[committed]);
    assert_eq!(rebased.position, Some(5));
}

#[test]
fn non_insert_pairs_pass_through() {
    // Concurrent deletes are deliberately not transformed; path locks are
    // the tool for callers that need stronger safety there.
    let mut committed = insert("a", "text", 1, "abc", 100);
    committed.kind = OpKind::Delete;
    let op = insert("b", "text", 5, "X", 200);
    let rebased = transform(op, &[committed]);
    assert_eq!(rebased.position, Some(5));
}

#[test]
fn shift_counts_characters_not_bytes() {
    let committed = insert("a", "text", 0, "éé", 100);
    let op = insert("b", "text", 3, "X", 200);
    let rebased = transform(op, &[committed]);
    assert_eq!(rebased.position, Some(5));
}

#[test]
fn concurrent_inserts_converge_on_both_replicas() {
    // Client A inserts "X" at 1 first; client B concurrently inserts "Y" at
    // 1. The client-id tiebreak (b > a) shifts B's insert to 2, so both
    // replicas end at "hXYello".
    let base = json!({ "text": "hello" });
    let op_a = insert("a", "text", 1, "X", 100);
    let op_b = insert("b", "text", 1, "Y", 200);

    let mut replica_one = base.clone();
    apply(&mut replica_one, &op_a).unwrap();
    apply(&mut replica_one, &transform(op_b.clone(), std::slice::from_ref(&op_a))).unwrap();

    let mut replica_two = base.clone();
    apply(&mut replica_two, &op_b).unwrap();
    apply(&mut replica_two, &transform(op_a.clone(), std::slice::from_ref(&op_b))).unwrap();

    assert_eq!(replica_one, replica_two);
    assert_eq!(replica_one, json!({ "text": "hXYello" }));
}

#[test]
fn convergence_holds_for_distinct_positions() {
    let base = json!({ "text": "hello" });
    let op_a = insert("a", "text", 1, "X", 100);
    let op_b = insert("b", "text", 4, "Y", 200);

    let mut replica_one = base.clone();
    apply(&mut replica_one, &op_a).unwrap();
    apply(&mut replica_one, &transform(op_b.clone(), std::slice::from_ref(&op_a))).unwrap();

    let mut replica_two = base.clone();
    apply(&mut replica_two, &op_b).unwrap();
    apply(&mut replica_two, &transform(op_a.clone(), std::slice::from_ref(&op_b))).unwrap();

    assert_eq!(replica_one, replica_two);
    assert_eq!(replica_one, json!({ "text": "hXellYo" }));
}
