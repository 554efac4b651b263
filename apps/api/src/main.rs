mod config;
mod db;
mod errors;
mod jobs;
mod models;
mod routes;
mod shields;
mod state;
mod store;
mod streaks;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::jobs::scheduler::spawn_scheduler;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::PgStreakStore;
use crate::streaks::clock::SystemClock;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Streaks API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStreakStore::new(db));

    info!(
        "Milestones: {:?}, auto-claim {}",
        config
            .milestones
            .reached(i32::MAX)
            .map(|m| m.threshold)
            .collect::<Vec<_>>(),
        if config.auto_claim_enabled { "on" } else { "off" }
    );

    let state = AppState::new(config.clone(), store, Arc::new(SystemClock));

    if config.scheduler_enabled {
        spawn_scheduler(state.clone());
    } else {
        info!("Job scheduler disabled; trigger jobs via /api/v1/jobs/*");
    }

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
