//! Per-user presence aggregated across connected devices.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::now_millis;

/// Reported availability of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Actively connected.
    Online,
    /// Connected but inactive.
    Idle,
    /// Marked away by the user.
    Offline,
}

/// Aggregated presence of one user across all their devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Opaque principal identifier.
    pub user_id: String,
    /// Display name, refreshed on every join.
    pub username: String,
    /// Current availability.
    pub status: PresenceStatus,
    /// What the user is doing right now, if announced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    /// Last activity wall clock, in milliseconds.
    pub last_seen: u64,
    /// Number of connected devices; the record exists iff this is positive.
    pub connected_devices: u32,
}

/// What happened to a user's record after a device disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Last device gone; the record was removed.
    Left,
    /// Still connected on this many other devices.
    StillConnected(u32),
    /// No record existed for the user.
    Unknown,
}

/// UserId → aggregated presence registry.
#[derive(Default)]
pub struct PresenceRegistry {
    records: DashMap<String, PresenceRecord>,
}

impl PresenceRegistry {
    /// Register a device for the user; returns the device count afterwards.
    pub fn join(&self, user_id: &str, username: &str) -> u32 {
        let mut record = self
            .records
            .entry(user_id.to_owned())
            .or_insert_with(|| PresenceRecord {
                user_id: user_id.to_owned(),
                username: username.to_owned(),
                status: PresenceStatus::Online,
                current_action: None,
                last_seen: now_millis(),
                connected_devices: 0,
            });
        record.connected_devices += 1;
        record.username = username.to_owned();
        record.status = PresenceStatus::Online;
        record.last_seen = now_millis();
        record.connected_devices
    }

    /// Unregister one device for the user.
    pub fn leave(&self, user_id: &str) -> LeaveOutcome {
        match self.records.entry(user_id.to_owned()) {
            Entry::Occupied(mut held) => {
                let remaining = {
                    let record = held.get_mut();
                    record.connected_devices = record.connected_devices.saturating_sub(1);
                    record.connected_devices
                };
                if remaining == 0 {
                    held.remove();
                    LeaveOutcome::Left
                } else {
                    LeaveOutcome::StillConnected(remaining)
                }
            }
            Entry::Vacant(_) => LeaveOutcome::Unknown,
        }
    }

    /// Update a user's availability; false if the user is not present.
    pub fn set_status(&self, user_id: &str, status: PresenceStatus) -> bool {
        match self.records.get_mut(user_id) {
            Some(mut record) => {
                record.status = status;
                record.last_seen = now_millis();
                true
            }
            None => false,
        }
    }

    /// Record what the user is currently doing (searching, inferring, ...).
    pub fn set_action(&self, user_id: &str, action: Option<String>) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            record.current_action = action;
            record.last_seen = now_millis();
        }
    }

    /// Snapshot of all present users, ordered by user id for stable output.
    pub fn list(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|record| record.value().clone())
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }

    /// Device count for a user, zero when absent.
    pub fn devices(&self, user_id: &str) -> u32 {
        self.records
            .get(user_id)
            .map(|record| record.connected_devices)
            .unwrap_or(0)
    }
}
