//! Domain events and the bounded in-memory replay log.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of events carried by the bus, tagged with their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A tile came into existence.
    #[serde(rename = "tile:created")]
    TileCreated,
    /// A tile's content changed.
    #[serde(rename = "tile:updated")]
    TileUpdated,
    /// A tile was removed.
    #[serde(rename = "tile:deleted")]
    TileDeleted,
    /// An inference result was saved to a tile.
    #[serde(rename = "inference:saved")]
    InferenceSaved,
    /// First device of a user connected.
    #[serde(rename = "user:joined")]
    UserJoined,
    /// Last device of a user disconnected.
    #[serde(rename = "user:left")]
    UserLeft,
    /// A user is running a search.
    #[serde(rename = "user:searching")]
    UserSearching,
    /// A user is running an inference.
    #[serde(rename = "user:inferring")]
    UserInferring,
    /// A user changed their availability.
    #[serde(rename = "user:status:changed")]
    UserStatusChanged,
    /// A named user action.
    #[serde(rename = "user:action")]
    UserAction,
    /// Generic awareness ping with the action kind nested in the data.
    #[serde(rename = "activity:update")]
    ActivityUpdate,
}

/// A single published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Opaque payload; its schema belongs to the producer.
    #[serde(default)]
    pub data: Value,
    /// Acting principal.
    pub user_id: String,
    /// Server wall clock at publish, in milliseconds.
    pub timestamp: u64,
    /// Domain channel scope, absent for global events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Bounded, time-ordered ring of recent events for reconnect catch-up.
///
/// Not a system of record: a process restart loses the log.
pub struct EventLog {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventLog {
    /// A log retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn ring(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().expect("event log lock poisoned")
    }

    /// Append an event, evicting the oldest beyond capacity.
    pub fn append(&self, event: Event) {
        let mut events = self.ring();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Events strictly newer than `timestamp`, in insertion order.
    pub fn since(&self, timestamp: u64) -> Vec<Event> {
        self.ring()
            .iter()
            .filter(|event| event.timestamp > timestamp)
            .cloned()
            .collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.ring().len()
    }

    /// Whether the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }
}
