//! Single-process classroom server.
//!
//! Run with: cargo run -p classroom-server -- --bind 127.0.0.1:3000
//!
//! Students connect to `/ws/student/{session_id}/{student_id}`, instructors
//! to `/ws/admin/{session_id}`. Sessions are created over `POST /api/sessions`
//! or up front with `--session`.

mod api;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use classroom_core::SyncConfig;
use classroom_session::{
    SessionHub,
    storage::{MemoryDirectory, MemoryTaskCatalog},
};
use classroom_transport::websocket::create_ws_router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;

#[derive(Parser)]
#[command(name = "classroom-server", about = "Live classroom session server")]
struct Args {
    /// TOML configuration file. `CLASSROOM_*` variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Session id to open at startup. May be repeated.
    #[arg(long = "session")]
    sessions: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = SyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    tracing::info!(?config, "Configuration loaded");

    let directory = Arc::new(MemoryDirectory::new());
    for id in &args.sessions {
        directory.insert_session(id);
        tracing::info!(session_id = %id, "Session opened");
    }
    let hub = Arc::new(SessionHub::new(
        directory.clone(),
        Arc::new(MemoryTaskCatalog::new()),
        config,
    ));
    let sweeper = hub.spawn_afk_sweeper();

    let app = api::router(AppState {
        hub: hub.clone(),
        directory,
    })
    .merge(create_ws_router(hub))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    tracing::info!("Server listening on http://{}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    sweeper.abort();
    Ok(())
}
