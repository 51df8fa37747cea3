//! Documentation of the wallpaper engagement ledger.
//!
//! Records who liked which wallpaper and keeps a fast per-wallpaper count.
//!
//!
//!
//! # Identity
//! - Signed in users are keyed by account id, taken from the auth gateway header
//! - Anonymous users with a device fingerprint of 16+ characters are keyed by fingerprint
//! - Everyone else is keyed by network address
//! - The three tiers never match each other, liking from a fingerprint and from an address are two likes
//!
//!
//!
//! # Storage
//!
//! A single SQLite database holds everything.
//!
//! - `wallpaper_likes` is the source of truth, one row per actor and wallpaper
//! - `wallpaper_like_counts` is a counter cache for fast reads
//! - `wallpapers.likes` mirrors the counter for the rest of the site
//! - `wallpaper_like_log` is an append only audit trail
//! - `user_like_summary` keeps each account's lifetime total
//!
//! Toggles move the edge, both counters, the lifetime total and the audit trail in one
//! transaction. The counters can still drift after manual edits, run `process rebuild`
//! to recount them from the edges.
//!
//!
//!
//! # Notes
//!
//! ## Login merge
//! Likes given anonymously from an address move to the account on `POST /likes/merge`.
//! Fingerprint likes stay where they are.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run the server, logs are controlled with `RUST_LOG`.
//! ```sh
//! RUST_LOG=info cargo run --bin engagement
//! ```
//!
//! Recount all counters.
//! ```sh
//! cargo run --bin process -- rebuild
//! ```
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod audit;
pub mod config;
pub mod counter;
pub mod database;
pub mod error;
pub mod identity;
pub mod merge;
pub mod query;
pub mod routes;
pub mod state;
pub mod store;
pub mod subject;
pub mod toggle;
pub mod utils;

use routes::{
    count_handler, health_handler, merge_handler, mine_handler, stats_handler, status_handler,
    toggle_handler, top_handler,
};
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health_handler))
        .route("/likes/toggle", post(toggle_handler))
        .route("/likes/status", get(status_handler))
        .route("/likes/count", get(count_handler))
        .route("/likes/top", get(top_handler))
        .route("/likes/stats", get(stats_handler))
        .route("/likes/mine", get(mine_handler))
        .route("/likes/merge", post(merge_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    let app = build_router(state);

    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
