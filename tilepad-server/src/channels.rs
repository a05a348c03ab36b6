//! Channel-scoped fan-out of server messages to live connections.

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::realtime::ServerEnvelope;

/// Name of the implicit channel every connection belongs to.
pub const GLOBAL_CHANNEL: &str = "global";

/// Channel name for a domain.
pub fn domain_channel(domain: &str) -> String {
    format!("domain:{domain}")
}

/// Maps channel names to the connections currently subscribed to them.
///
/// Membership operations are idempotent; broadcast is O(members in channel).
#[derive(Default)]
pub struct ChannelRouter {
    members: DashMap<String, HashMap<u64, UnboundedSender<ServerEnvelope>>>,
}

impl ChannelRouter {
    /// Subscribe a connection to a channel.
    pub fn join(&self, channel: &str, connection: u64, sender: UnboundedSender<ServerEnvelope>) {
        self.members
            .entry(channel.to_owned())
            .or_default()
            .insert(connection, sender);
    }

    /// Unsubscribe a connection from a channel.
    pub fn leave(&self, channel: &str, connection: u64) {
        if let Some(mut members) = self.members.get_mut(channel) {
            members.remove(&connection);
        }
    }

    /// Remove a connection from every channel it joined.
    pub fn drop_connection(&self, connection: u64) {
        for mut members in self.members.iter_mut() {
            members.remove(&connection);
        }
        self.members.retain(|_, members| !members.is_empty());
    }

    /// Deliver a message to every current member, returning how many queues
    /// accepted it.
    pub fn broadcast(&self, channel: &str, message: &ServerEnvelope) -> usize {
        let Some(members) = self.members.get(channel) else {
            return 0;
        };
        let mut delivered = 0;
        for sender in members.values() {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of connections subscribed to a channel.
    pub fn member_count(&self, channel: &str) -> usize {
        self.members
            .get(channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}
