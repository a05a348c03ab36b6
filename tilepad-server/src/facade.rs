//! Producer-side API for publishing domain events.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::events::{Event, EventKind};
use crate::now_millis;
use crate::presence::PresenceRecord;
use crate::realtime::RealtimeServer;

/// A user-initiated action to announce.
#[derive(Debug, Clone)]
pub struct UserAction {
    /// Acting principal.
    pub user_id: String,
    /// What the user did.
    pub action: String,
    /// Domain to scope the announcement to, if any.
    pub domain: Option<String>,
    /// Extra producer-defined detail.
    pub details: Option<Value>,
}

/// Stateless publishing facade used by the surrounding application.
///
/// Producers never see transport errors: with no realtime server attached,
/// publishes are logged no-ops and the reads return empty.
#[derive(Clone, Default)]
pub struct EventFacade {
    realtime: Option<Arc<RealtimeServer>>,
}

impl EventFacade {
    /// A facade publishing through `realtime`.
    pub fn new(realtime: Arc<RealtimeServer>) -> Self {
        Self {
            realtime: Some(realtime),
        }
    }

    /// A facade with no server attached; every publish is dropped.
    pub fn detached() -> Self {
        Self { realtime: None }
    }

    fn publish(&self, event: Event) {
        match &self.realtime {
            Some(server) => {
                server.publish(event);
            }
            None => debug!("no realtime server running, dropping {:?} event", event.kind),
        }
    }

    fn tile_event(&self, kind: EventKind, tile_id: &str, data: Value, user_id: &str) {
        // The tile's domain, when present, scopes the broadcast.
        let channel = data.get("domain").and_then(Value::as_str).map(str::to_owned);
        self.publish(Event {
            kind,
            data: json!({ "tileId": tile_id, "data": data }),
            user_id: user_id.to_owned(),
            timestamp: now_millis(),
            channel,
        });
    }

    /// Announce a created tile.
    pub fn notify_tile_created(&self, tile_id: &str, data: Value, user_id: &str) {
        self.tile_event(EventKind::TileCreated, tile_id, data, user_id);
    }

    /// Announce an updated tile.
    pub fn notify_tile_updated(&self, tile_id: &str, data: Value, user_id: &str) {
        self.tile_event(EventKind::TileUpdated, tile_id, data, user_id);
    }

    /// Announce a deleted tile within its domain.
    pub fn notify_tile_deleted(&self, tile_id: &str, domain: &str, user_id: &str) {
        self.publish(Event {
            kind: EventKind::TileDeleted,
            data: json!({ "tileId": tile_id, "domain": domain }),
            user_id: user_id.to_owned(),
            timestamp: now_millis(),
            channel: Some(domain.to_owned()),
        });
    }

    /// Announce an inference result saved to a tile.
    pub fn notify_inference_saved(&self, tile_id: &str, data: Value, user_id: &str) {
        self.tile_event(EventKind::InferenceSaved, tile_id, data, user_id);
    }

    /// Announce a named user action, domain-scoped when a domain is given.
    pub fn publish_user_action(&self, action: UserAction) {
        self.publish(Event {
            kind: EventKind::UserAction,
            data: json!({ "action": action.action, "details": action.details }),
            user_id: action.user_id,
            timestamp: now_millis(),
            channel: action.domain,
        });
    }

    /// Fire-and-forget awareness ping that a user is searching.
    pub fn broadcast_search_activity(&self, user_id: &str, query: &str, domain: Option<&str>) {
        self.activity(user_id, json!({ "action": "searching", "query": query }), domain);
    }

    /// Fire-and-forget awareness ping that a user is running an inference.
    pub fn broadcast_inference_activity(&self, user_id: &str, question: &str, domain: Option<&str>) {
        self.activity(
            user_id,
            json!({ "action": "inferring", "question": question }),
            domain,
        );
    }

    fn activity(&self, user_id: &str, data: Value, domain: Option<&str>) {
        self.publish(Event {
            kind: EventKind::ActivityUpdate,
            data,
            user_id: user_id.to_owned(),
            timestamp: now_millis(),
            channel: domain.map(str::to_owned),
        });
    }

    /// Events newer than `timestamp`, for reconnect catch-up.
    pub fn events_since(&self, timestamp: u64) -> Vec<Event> {
        self.realtime
            .as_ref()
            .map(|server| server.event_log().since(timestamp))
            .unwrap_or_default()
    }

    /// Current presence snapshot.
    pub fn active_users(&self) -> Vec<PresenceRecord> {
        self.realtime
            .as_ref()
            .map(|server| server.presence().list())
            .unwrap_or_default()
    }
}
