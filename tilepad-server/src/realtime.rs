//! The real-time event server: connection lifecycle and message dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::channels::{ChannelRouter, GLOBAL_CHANNEL, domain_channel};
use crate::events::{Event, EventKind, EventLog};
use crate::now_millis;
use crate::presence::{LeaveOutcome, PresenceRecord, PresenceRegistry, PresenceStatus};

/// Tunables for the realtime server.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Silence threshold after which a connection is dropped.
    pub ping_timeout: Duration,
    /// Retained event count for reconnect catch-up.
    pub max_event_log: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(60_000),
            max_event_log: 1_000,
        }
    }
}

/// Inbound message envelope: `{ name, payload, ack? }`.
#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    name: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    ack: Option<u64>,
}

/// Payload of `user:join`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    user_id: String,
    username: String,
}

/// Payload of `event:publish`; the server stamps user and timestamp itself.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishPayload {
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    channel: Option<String>,
}

/// A recognized inbound message.
#[derive(Debug)]
enum ClientMsg {
    UserJoin { user_id: String, username: String },
    ChannelJoin(String),
    ChannelLeave(String),
    EventPublish(PublishPayload),
    UserStatus(PresenceStatus),
    UsersList,
}

impl ClientMsg {
    /// Parse a named payload; `None` covers both unknown names and payloads
    /// that fail their schema, which the server ignores alike.
    fn parse(name: &str, payload: Value) -> Option<Self> {
        let msg = match name {
            "user:join" => {
                let JoinPayload { user_id, username } = serde_json::from_value(payload).ok()?;
                ClientMsg::UserJoin { user_id, username }
            }
            "channel:join" => ClientMsg::ChannelJoin(serde_json::from_value(payload).ok()?),
            "channel:leave" => ClientMsg::ChannelLeave(serde_json::from_value(payload).ok()?),
            "event:publish" => ClientMsg::EventPublish(serde_json::from_value(payload).ok()?),
            "user:status" => ClientMsg::UserStatus(serde_json::from_value(payload).ok()?),
            "users:list" => ClientMsg::UsersList,
            _ => return None,
        };
        Some(msg)
    }
}

/// An outbound message, tagged with its wire name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name", content = "payload")]
pub enum ServerMsg {
    /// First frame on every connection, carrying its opaque id.
    #[serde(rename = "connection:established", rename_all = "camelCase")]
    ConnectionEstablished {
        /// Server-assigned connection id.
        connection_id: u64,
    },
    /// A published event fanned out on a channel.
    #[serde(rename = "realtime:event")]
    RealtimeEvent(Event),
    /// Presence snapshot.
    #[serde(rename = "users:active")]
    UsersActive(Vec<PresenceRecord>),
    /// A user changed availability.
    #[serde(rename = "user:status:changed", rename_all = "camelCase")]
    UserStatusChanged {
        /// Whose status changed.
        user_id: String,
        /// The new status.
        status: PresenceStatus,
    },
}

/// Outbound envelope: `{ name, payload, ack? }`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEnvelope {
    /// The message itself.
    #[serde(flatten)]
    pub msg: ServerMsg,
    /// Correlation id echoed back for request/response messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl From<ServerMsg> for ServerEnvelope {
    fn from(msg: ServerMsg) -> Self {
        Self { msg, ack: None }
    }
}

/// User bound to a connection by `user:join`, for its whole lifetime.
struct Identity {
    user_id: String,
    username: String,
}

/// Accepts persistent client connections, tracks presence, and fans events
/// out to channel members.
pub struct RealtimeServer {
    config: RealtimeConfig,
    presence: PresenceRegistry,
    channels: ChannelRouter,
    log: EventLog,
    connections: DashMap<u64, UnboundedSender<ServerEnvelope>>,
    next_connection: AtomicU64,
}

impl RealtimeServer {
    /// A server with the given tunables and an empty event log.
    pub fn new(config: RealtimeConfig) -> Self {
        let log = EventLog::new(config.max_event_log);
        Self {
            config,
            presence: PresenceRegistry::default(),
            channels: ChannelRouter::default(),
            log,
            connections: DashMap::new(),
            next_connection: AtomicU64::new(0),
        }
    }

    /// The presence registry.
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// The channel router.
    pub fn channels(&self) -> &ChannelRouter {
        &self.channels
    }

    /// The replay log.
    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Broadcast an event on its channel (domain-scoped if set, global
    /// otherwise) and record it in the replay log. Returns the number of
    /// connections the event was queued to.
    pub fn publish(&self, event: Event) -> usize {
        let channel = match &event.channel {
            Some(domain) => domain_channel(domain),
            None => GLOBAL_CHANNEL.to_owned(),
        };
        let delivered = self
            .channels
            .broadcast(&channel, &ServerMsg::RealtimeEvent(event.clone()).into());
        self.log.append(event);
        delivered
    }

    /// Drive one client connection to completion.
    ///
    /// Messages from the connection are processed in arrival order; outbound
    /// traffic is drained from a per-connection queue so a slow consumer
    /// never blocks a broadcast.
    pub async fn on_connection(self: Arc<Self>, socket: WebSocket) {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        info!("connection accepted, id = {connection_id}");

        let (outbound, mut outbox) = mpsc::unbounded_channel::<ServerEnvelope>();
        self.connections.insert(connection_id, outbound.clone());
        self.channels
            .join(GLOBAL_CHANNEL, connection_id, outbound.clone());
        outbound
            .send(ServerMsg::ConnectionEstablished { connection_id }.into())
            .ok();

        let (mut sink, mut stream) = socket.split();
        let mut identity: Option<Identity> = None;
        let mut last_seen = Instant::now();
        let mut ping = time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );

        loop {
            tokio::select! {
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(frame))) => {
                            last_seen = Instant::now();
                            self.handle_frame(connection_id, frame.as_str(), &mut identity, &outbound);
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => last_seen = Instant::now(),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {} // binary frames are not part of the protocol
                        Some(Err(err)) => {
                            debug!("transport error on connection {connection_id}: {err}");
                            break;
                        }
                    }
                }
                queued = outbox.recv() => {
                    match queued {
                        Some(envelope) => {
                            let frame = serde_json::to_string(&envelope).expect("failed serialize");
                            if sink.send(Message::text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() > self.config.ping_timeout {
                        info!("dropping silent connection {connection_id}");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.disconnect(connection_id, identity);
    }

    /// Parse and dispatch one inbound frame. A rejected message is dropped;
    /// it never terminates the connection.
    fn handle_frame(
        &self,
        connection_id: u64,
        frame: &str,
        identity: &mut Option<Identity>,
        outbound: &UnboundedSender<ServerEnvelope>,
    ) {
        let Ok(envelope) = serde_json::from_str::<ClientEnvelope>(frame) else {
            debug!("ignoring unparseable frame on connection {connection_id}");
            return;
        };
        let ClientEnvelope { name, payload, ack } = envelope;
        let Some(msg) = ClientMsg::parse(&name, payload) else {
            debug!("ignoring unknown or malformed `{name}` on connection {connection_id}");
            return;
        };

        let Some(user) = identity.as_ref() else {
            // Only a well-formed user:join moves the connection past Accepted.
            if let ClientMsg::UserJoin { user_id, username } = msg {
                *identity = Some(self.handle_join(connection_id, user_id, username, outbound));
            } else {
                debug!("ignoring message before user:join on connection {connection_id}");
            }
            return;
        };

        match msg {
            ClientMsg::UserJoin { .. } => {
                debug!("ignoring repeat user:join on connection {connection_id}");
            }
            ClientMsg::ChannelJoin(domain) => {
                self.channels
                    .join(&domain_channel(&domain), connection_id, outbound.clone());
            }
            ClientMsg::ChannelLeave(domain) => {
                self.channels.leave(&domain_channel(&domain), connection_id);
            }
            ClientMsg::EventPublish(publish) => {
                let event = Event {
                    kind: publish.kind,
                    data: publish.data,
                    user_id: user.user_id.clone(),
                    timestamp: now_millis(),
                    channel: publish.channel,
                };
                if matches!(
                    event.kind,
                    EventKind::ActivityUpdate | EventKind::UserSearching | EventKind::UserInferring
                ) {
                    let action = event
                        .data
                        .get("action")
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                    self.presence.set_action(&user.user_id, action);
                }
                self.publish(event);
            }
            ClientMsg::UserStatus(status) => {
                self.presence.set_status(&user.user_id, status);
                self.channels.broadcast(
                    GLOBAL_CHANNEL,
                    &ServerMsg::UserStatusChanged {
                        user_id: user.user_id.clone(),
                        status,
                    }
                    .into(),
                );
            }
            ClientMsg::UsersList => {
                outbound
                    .send(ServerEnvelope {
                        msg: ServerMsg::UsersActive(self.presence.list()),
                        ack,
                    })
                    .ok();
            }
        }
    }

    fn handle_join(
        &self,
        connection_id: u64,
        user_id: String,
        username: String,
        outbound: &UnboundedSender<ServerEnvelope>,
    ) -> Identity {
        let devices = self.presence.join(&user_id, &username);
        info!("connection {connection_id}: {user_id} joined ({devices} devices)");
        if devices == 1 {
            self.publish(Event {
                kind: EventKind::UserJoined,
                data: serde_json::json!({ "username": username }),
                user_id: user_id.clone(),
                timestamp: now_millis(),
                channel: None,
            });
        }
        // The joining connection alone gets the initial presence snapshot.
        outbound
            .send(ServerMsg::UsersActive(self.presence.list()).into())
            .ok();
        Identity { user_id, username }
    }

    fn disconnect(&self, connection_id: u64, identity: Option<Identity>) {
        info!("disconnection, id = {connection_id}");
        self.connections.remove(&connection_id);
        self.channels.drop_connection(connection_id);
        let Some(user) = identity else {
            return;
        };
        match self.presence.leave(&user.user_id) {
            LeaveOutcome::Left => {
                self.publish(Event {
                    kind: EventKind::UserLeft,
                    data: serde_json::json!({ "username": user.username }),
                    user_id: user.user_id,
                    timestamp: now_millis(),
                    channel: None,
                });
            }
            LeaveOutcome::StillConnected(devices) => {
                debug!("{} still connected on {devices} devices", user.user_id);
            }
            LeaveOutcome::Unknown => {}
        }
    }
}
