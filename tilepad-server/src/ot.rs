//! Rebasing of operations against concurrent history.

use crate::store::{OpKind, Operation};

/// Rebase `op` against operations that committed concurrently with it.
///
/// The rule set deliberately covers only string-insert against string-insert
/// on the identical path: an earlier concurrent insert below the operation's
/// position shifts it right by the inserted character count, and inserts at
/// the same position are ordered by a lexicographic client-id tiebreak so
/// that both replicas of a rebase agree. Every other kind/path pairing passes
/// through unchanged; callers that need stronger safety for concurrent
/// deletes or updates serialize them with path locks instead. Do not widen
/// this silently.
pub fn transform(mut op: Operation, against: &[Operation]) -> Operation {
    for other in against {
        if other.timestamp >= op.timestamp {
            continue;
        }
        if op.kind != OpKind::Insert || other.kind != OpKind::Insert || op.path != other.path {
            continue;
        }
        let (Some(position), Some(other_position)) = (op.position, other.position) else {
            continue;
        };
        let Some(shift) = other
            .value
            .as_ref()
            .and_then(|value| value.as_str())
            .map(|text| text.chars().count())
        else {
            continue;
        };
        if other_position < position
            || (other_position == position && op.client_id > other.client_id)
        {
            op.position = Some(position + shift);
        }
    }
    op
}
