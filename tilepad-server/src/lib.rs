//! Server backend for the Tilepad collaborative editing engine.
//!
//! Two subsystems share this crate: the editing engine (documents, JSON-path
//! operations, operational transformation, path locks, edit sessions) exposed
//! to hosting code as in-process operations, and the realtime event bus
//! (persistent connections, channel fan-out, presence, replay log) exposed
//! over a WebSocket endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channels;
pub mod content;
pub mod events;
pub mod facade;
pub mod locks;
pub mod ot;
pub mod presence;
pub mod realtime;
pub mod sessions;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::time;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::facade::EventFacade;
use crate::locks::{LockAttempt, LockTable};
use crate::realtime::{RealtimeConfig, RealtimeServer};
use crate::sessions::SessionRegistry;
use crate::store::{DocumentStats, DocumentStore};

/// How often the session reaper sweeps.
const REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime returned before UNIX_EPOCH")
        .as_millis() as u64
}

/// Server configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Origin allowed to reach the transport, if restricted.
    pub frontend_origin: Option<String>,
    /// Interval between keepalive pings.
    pub ping_interval_ms: u64,
    /// Silence threshold after which a connection is dropped.
    pub ping_timeout_ms: u64,
    /// Retained event count for reconnect catch-up.
    pub max_event_log: usize,
    /// Idle window after which an edit session stops counting as live.
    pub session_idle_ms: u64,
    /// Default TTL for exclusive path locks.
    pub path_lock_ttl_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frontend_origin: None,
            ping_interval_ms: 25_000,
            ping_timeout_ms: 60_000,
            max_event_log: 1_000,
            session_idle_ms: 30_000,
            path_lock_ttl_ms: 60_000,
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            frontend_origin: std::env::var("FRONTEND_ORIGIN").ok(),
            ping_interval_ms: env_or("PING_INTERVAL_MS", defaults.ping_interval_ms)?,
            ping_timeout_ms: env_or("PING_TIMEOUT_MS", defaults.ping_timeout_ms)?,
            max_event_log: env_or("MAX_EVENT_LOG", defaults.max_event_log)?,
            session_idle_ms: env_or("SESSION_IDLE_MS", defaults.session_idle_ms)?,
            path_lock_ttl_ms: env_or("PATH_LOCK_TTL_MS", defaults.path_lock_ttl_ms)?,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("Unable to parse {name}")),
        Err(_) => Ok(default),
    }
}

/// The collaborative editing engine: documents, sessions, and path locks.
///
/// Hosting code holds an instance for the process lifetime or passes it
/// down; tests construct fresh ones.
pub struct CollabEngine {
    /// Document store and operation logs.
    pub documents: DocumentStore,
    /// Per-client edit sessions.
    pub sessions: SessionRegistry,
    /// Exclusive path locks, shared with the store's apply path.
    pub locks: Arc<LockTable>,
    lock_ttl: Duration,
}

impl CollabEngine {
    /// A fresh engine with the configured timeouts.
    pub fn new(config: &ServerConfig) -> Self {
        let locks = Arc::new(LockTable::default());
        Self {
            documents: DocumentStore::new(Arc::clone(&locks)),
            sessions: SessionRegistry::new(config.session_idle_ms),
            locks,
            lock_ttl: Duration::from_millis(config.path_lock_ttl_ms),
        }
    }

    /// Acquire a path lock with the configured default TTL.
    pub fn acquire_lock(&self, path: &str, user_id: &str) -> LockAttempt {
        self.locks.acquire(path, user_id, self.lock_ttl)
    }

    /// Release a path lock held by `user_id`.
    pub fn release_lock(&self, path: &str, user_id: &str) -> bool {
        self.locks.release(path, user_id)
    }

    /// Aggregate figures for a document, including live-session counts.
    pub async fn document_stats(&self, document_id: &str) -> Option<DocumentStats> {
        self.documents
            .document_stats(document_id, &self.sessions)
            .await
    }
}

/// The shared state of the server, accessible from within request handlers.
pub struct ServerState {
    /// The editor engine, exposed to hosting code.
    pub engine: CollabEngine,
    /// The realtime event bus.
    pub realtime: Arc<RealtimeServer>,
    /// Producer facade bound to the realtime server.
    pub events: EventFacade,
    start_time: u64,
    frontend_origin: Option<String>,
}

impl ServerState {
    /// Construct server state from configuration.
    pub fn new(config: ServerConfig) -> Self {
        let realtime = Arc::new(RealtimeServer::new(RealtimeConfig {
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
            max_event_log: config.max_event_log,
        }));
        Self {
            engine: CollabEngine::new(&config),
            events: EventFacade::new(Arc::clone(&realtime)),
            realtime,
            start_time: now_millis() / 1000,
            frontend_origin: config.frontend_origin,
        }
    }
}

/// Statistics about the server, returned from an API endpoint.
#[derive(Serialize)]
struct Stats {
    /// System time when the server started, in seconds since Unix epoch.
    start_time: u64,
    /// Number of documents currently tracked by the engine.
    num_documents: usize,
    /// Number of live realtime connections.
    num_connections: usize,
    /// Number of events retained for catch-up.
    num_events: usize,
}

/// Build the server router and spawn its background tasks.
pub fn server(state: Arc<ServerState>) -> Router {
    tokio::spawn(session_reaper(Arc::clone(&state)));

    let mut router = Router::new()
        .route("/api/socket", get(socket_handler))
        .route("/api/document/{id}", get(document_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(Arc::clone(&state));

    if let Some(origin) = &state.frontend_origin {
        match origin.parse::<HeaderValue>() {
            Ok(value) => router = router.layer(CorsLayer::new().allow_origin(value)),
            Err(_) => warn!("ignoring invalid FRONTEND_ORIGIN {origin}"),
        }
    }
    router
}

/// Handler for the `/api/socket` endpoint.
async fn socket_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let realtime = Arc::clone(&state.realtime);
    ws.on_upgrade(move |socket| realtime.on_connection(socket))
}

/// Handler for the `/api/document/{id}` endpoint.
async fn document_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.documents.get_document(&id).await {
        Some(document) => Json(document.content).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Handler for the `/api/stats` endpoint.
async fn stats_handler(State(state): State<Arc<ServerState>>) -> Json<Stats> {
    Json(Stats {
        start_time: state.start_time,
        num_documents: state.engine.documents.document_count(),
        num_connections: state.realtime.connection_count(),
        num_events: state.realtime.event_log().len(),
    })
}

/// Reaps idle edit sessions on a fixed interval.
async fn session_reaper(state: Arc<ServerState>) {
    let timeout = state.engine.sessions.idle_timeout_ms();
    loop {
        time::sleep(REAPER_INTERVAL).await;
        let removed = state.engine.sessions.cleanup(timeout);
        if removed > 0 {
            info!("reaped {removed} idle sessions");
        }
    }
}
