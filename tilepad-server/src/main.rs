use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tilepad_server::{ServerConfig, ServerState, server};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "0.0.0.0:3030")]
    host: SocketAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ServerConfig::from_env().expect("Loading configuration");
    let state = Arc::new(ServerState::new(config));

    info!("Starting server on http://{}", args.host);

    let listener = tokio::net::TcpListener::bind(args.host)
        .await
        .expect("Unable to bind to host");
    axum::serve(listener, server(state).layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.expect("Listen to ctrlc") })
        .await
        .unwrap();

    info!("Server has shut down");
}
