//! Versioned documents, their operation logs, and snapshots.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::content::{self, ContentError};
use crate::locks::LockTable;
use crate::now_millis;
use crate::ot;
use crate::sessions::SessionRegistry;

/// Kind of edit applied at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Splice into a sequence or string, or set a fresh key.
    Insert,
    /// Remove a span, an element, or a key.
    Delete,
    /// Overwrite whatever is at the path.
    Update,
}

/// A committed edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique operation identifier, assigned at commit.
    pub id: String,
    /// Device/connection that authored the edit.
    pub client_id: String,
    /// Acting principal.
    pub user_id: String,
    /// What the edit does.
    #[serde(rename = "type")]
    pub kind: OpKind,
    /// Dotted path of mapping keys and sequence indices.
    pub path: String,
    /// Payload for insert/update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Previous value, carried for tracking only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Character offset for string edits, element index for sequence edits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Span length for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Server wall clock at commit, in milliseconds. Advisory; ordering is
    /// by revision.
    pub timestamp: u64,
    /// Document revision the edit was authored against, preserved for later
    /// transforms.
    pub revision: u64,
}

/// Caller-provided fields of an edit; the store stamps the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInput {
    /// Device/connection authoring the edit.
    pub client_id: String,
    /// Acting principal.
    pub user_id: String,
    /// What the edit does.
    #[serde(rename = "type")]
    pub kind: OpKind,
    /// Dotted target path.
    pub path: String,
    /// Payload for insert/update.
    #[serde(default)]
    pub value: Option<Value>,
    /// Previous value, tracking only.
    #[serde(default)]
    pub old_value: Option<Value>,
    /// Character or element offset.
    #[serde(default)]
    pub position: Option<usize>,
    /// Span length for deletes.
    #[serde(default)]
    pub length: Option<usize>,
    /// Revision the edit was authored against. Operations committed after it
    /// are the concurrent set the edit is rebased over; defaults to the
    /// current revision (nothing to rebase).
    #[serde(default)]
    pub base_revision: Option<u64>,
}

/// A versioned document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Caller-supplied identity.
    pub id: String,
    /// Committed operation count; increments by exactly one per apply.
    pub revision: u64,
    /// Hierarchical content.
    pub content: Value,
    /// Digest of `content`, maintained on every successful apply.
    pub hash: String,
    /// Principal that created the document.
    pub created_by: String,
    /// Wall clock at creation, in milliseconds.
    pub created_at: u64,
}

/// Immutable copy of a document at a revision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    /// Revision the snapshot was taken at.
    pub revision: u64,
    /// Deep-cloned content.
    pub content: Value,
    /// The operation log up to the snapshot.
    pub operations: Vec<Operation>,
    /// Content digest at the snapshot.
    pub hash: String,
    /// Principal that requested the snapshot.
    pub created_by: String,
    /// Wall clock at capture, in milliseconds.
    pub created_at: u64,
}

/// Aggregate figures for one document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    /// Current revision.
    pub revision: u64,
    /// Committed operation count.
    pub operation_count: usize,
    /// Live edit sessions on the document.
    pub active_sessions: usize,
    /// Wall clock of the last commit, or creation if none.
    pub last_modified: u64,
    /// Serialized content size in bytes.
    pub size_bytes: usize,
    /// Distinct users among the live sessions.
    pub active_editors: usize,
}

/// Why an engine operation was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// No such document.
    #[error("document not found")]
    NotFound,
    /// The target path is held by another user.
    #[error("path is locked by {0}")]
    Locked(String),
    /// The path descends through a scalar or is malformed.
    #[error("invalid path: {0}")]
    Path(String),
    /// The mutation itself was rejected; document state is untouched.
    #[error("mutation rejected: {0}")]
    Mutate(String),
}

impl From<ContentError> for EngineError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::Path(segment) => EngineError::Path(segment),
            ContentError::Mutate(reason) => EngineError::Mutate(reason),
        }
    }
}

/// State behind the per-document lock: the document plus its append-only log.
struct DocState {
    document: Document,
    operations: Vec<Operation>,
}

/// In-memory store of documents and their operation logs.
///
/// Each document lives behind its own `RwLock`; taking the write lock is the
/// exclusive critical section around lock-check, transform, mutate,
/// revision-bump, and log-append. Applies to different documents are
/// independent.
pub struct DocumentStore {
    documents: DashMap<String, Arc<RwLock<DocState>>>,
    locks: Arc<LockTable>,
}

impl DocumentStore {
    /// A store consulting `locks` for path exclusivity on apply.
    pub fn new(locks: Arc<LockTable>) -> Self {
        Self {
            documents: DashMap::new(),
            locks,
        }
    }

    /// Create a document with initial content, overwriting any existing
    /// entry under the same id.
    pub fn create_document(
        &self,
        document_id: &str,
        initial_content: Value,
        user_id: &str,
    ) -> Document {
        let document = Document {
            id: document_id.to_owned(),
            revision: 0,
            hash: content::digest(&initial_content),
            content: initial_content,
            created_by: user_id.to_owned(),
            created_at: now_millis(),
        };
        self.documents.insert(
            document_id.to_owned(),
            Arc::new(RwLock::new(DocState {
                document: document.clone(),
                operations: Vec::new(),
            })),
        );
        document
    }

    /// Current state of a document.
    pub async fn get_document(&self, document_id: &str) -> Option<Document> {
        let entry = self.entry(document_id)?;
        let state = entry.read().await;
        Some(state.document.clone())
    }

    /// Apply one edit, returning the document revision after the commit.
    ///
    /// The edit is rebased through the transformer against every operation
    /// committed after the revision it was authored at, then applied to a
    /// clone of the content so a rejected mutation leaves the document
    /// untouched.
    pub async fn apply_operation(
        &self,
        document_id: &str,
        input: OperationInput,
    ) -> Result<u64, EngineError> {
        if input.path.is_empty() {
            return Err(EngineError::Path("empty path".to_owned()));
        }
        let entry = self.entry(document_id).ok_or(EngineError::NotFound)?;
        let mut state = entry.write().await;

        if let Some(holder) = self.locks.holder(&input.path) {
            if holder != input.user_id {
                return Err(EngineError::Locked(holder));
            }
        }

        let now = now_millis();
        let authored = input
            .base_revision
            .unwrap_or(state.document.revision)
            .min(state.document.revision);
        let op = Operation {
            id: format!("op-{now}-{:06x}", rand::random::<u32>() & 0xff_ffff),
            client_id: input.client_id,
            user_id: input.user_id,
            kind: input.kind,
            path: input.path,
            value: input.value,
            old_value: input.old_value,
            position: input.position,
            length: input.length,
            timestamp: now,
            revision: authored,
        };
        let op = ot::transform(op, &state.operations[authored as usize..]);

        let mut next = state.document.content.clone();
        content::apply(&mut next, &op)?;

        state.document.content = next;
        state.document.revision += 1;
        state.document.hash = content::digest(&state.document.content);
        state.operations.push(op);
        debug!(
            "applied operation to {document_id}, now at revision {}",
            state.document.revision
        );
        Ok(state.document.revision)
    }

    /// Slice of the operation log; `to` defaults to the end.
    pub async fn operation_history(
        &self,
        document_id: &str,
        from: usize,
        to: Option<usize>,
    ) -> Result<Vec<Operation>, EngineError> {
        let entry = self.entry(document_id).ok_or(EngineError::NotFound)?;
        let state = entry.read().await;
        let len = state.operations.len();
        let from = from.min(len);
        let to = to.unwrap_or(len).min(len).max(from);
        Ok(state.operations[from..to].to_vec())
    }

    /// Immutable copy of the document at its current revision.
    pub async fn create_snapshot(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Option<DocumentSnapshot> {
        let entry = self.entry(document_id)?;
        let state = entry.read().await;
        Some(DocumentSnapshot {
            revision: state.document.revision,
            content: state.document.content.clone(),
            operations: state.operations.clone(),
            hash: state.document.hash.clone(),
            created_by: user_id.to_owned(),
            created_at: now_millis(),
        })
    }

    /// Aggregate figures for a document, with session-derived counts taken
    /// from `sessions`.
    pub async fn document_stats(
        &self,
        document_id: &str,
        sessions: &SessionRegistry,
    ) -> Option<DocumentStats> {
        let entry = self.entry(document_id)?;
        let state = entry.read().await;
        let active = sessions.active_sessions(document_id);
        let mut editors: Vec<&str> = active.iter().map(|s| s.user_id.as_str()).collect();
        editors.sort_unstable();
        editors.dedup();
        let last_modified = state
            .operations
            .last()
            .map(|op| op.timestamp)
            .unwrap_or(state.document.created_at);
        Some(DocumentStats {
            revision: state.document.revision,
            operation_count: state.operations.len(),
            active_sessions: active.len(),
            last_modified,
            size_bytes: state.document.content.to_string().len(),
            active_editors: editors.len(),
        })
    }

    /// Number of documents tracked by the store.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn entry(&self, document_id: &str) -> Option<Arc<RwLock<DocState>>> {
        self.documents
            .get(document_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

/// Two versions conflict iff both their hashes and revisions differ.
pub fn detect_conflicts(a: &Document, b: &Document) -> bool {
    a.hash != b.hash && a.revision != b.revision
}

/// Merge two versions: last writer (by creation time) wins, the loser's
/// content is discarded. Deliberately not a CRDT; clock skew can flip the
/// winner, and callers needing convergence without a central clock must add
/// logical timestamps themselves.
pub fn merge_versions(a: &Document, b: &Document) -> Document {
    let winner = if b.created_at >= a.created_at { b } else { a };
    Document {
        id: format!("{}-merged-{:06x}", winner.id, rand::random::<u32>() & 0xff_ffff),
        revision: a.revision.max(b.revision) + 1,
        content: winner.content.clone(),
        hash: winner.hash.clone(),
        created_by: winner.created_by.clone(),
        created_at: now_millis(),
    }
}
