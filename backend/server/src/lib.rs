//! Live poll voting backend.
//!
//! Anonymous visitors vote on a poll option, may switch their vote later, and
//! anyone watching the poll sees counts move as it happens.
//!
//!
//!
//! # Flow
//!
//! - Visitor posts a vote, with or without a `sessionId` cookie
//! - No cookie: a session is minted and returned as a signed, HttpOnly cookie
//! - Same option again: rejected with 400, nothing changes
//! - Other option: old vote removed and decremented, new one recorded and incremented
//! - Every count change is pushed to the poll's results stream
//!
//!
//!
//! # Routes
//!
//! - `POST /polls/{poll_id}/votes` with `{"pollOptionId": "<uuid>"}`, 201 on success
//! - `GET /polls/{poll_id}/results` server-sent events, `{"pollOptionId", "votes"}` per change
//! - `GET /polls/{poll_id}` current standings, most votes first
//! - `POST /polls/{poll_id}/recount` rebuild the tally from the ledger
//! - `GET /healthz`
//!
//!
//!
//! # Notes
//!
//! ## Ledger + Tally
//! The ledger is the source of truth. The tally is a cache kept in step with
//! it by pairing every ledger write with one atomic adjustment. If a request
//! dies between the two, the counts drift until the next recount. This is a
//! tradeoff we are okay with, live counts matter more than blocking votes on
//! a cross-store transaction.
//!
//! ## Live results
//! Changes go out over in-process broadcast channels. A subscriber that
//! connects late sees nothing from before it connected, and a slow one skips
//! changes rather than holding up votes.
//!
//!
//!
//! # Setup
//!
//! In-memory, nothing else needed.
//! ```sh
//! RUST_LOG=info cargo run -p polls
//! ```
//!
//! Redis backed.
//! ```sh
//! STORE_BACKEND=redis REDIS_URL=redis://127.0.0.1:6379 SESSION_SECRET=change-me cargo run -p polls
//! ```
//!
//! Hammer a running server.
//! ```sh
//! cargo run -p tester -- --votes 500
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::ctrl_c;
#[cfg(unix)]
use signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod ledger;
pub mod models;
pub mod publisher;
pub mod routes;
pub mod session;
pub mod state;
pub mod tally;

use config::Config;
use error::ServerError;
use routes::{healthz, recount_handler, results_handler, standings_handler, votes_handler};
use state::State;

pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/polls/{poll_id}", get(standings_handler))
        .route("/polls/{poll_id}/votes", post(votes_handler))
        .route("/polls/{poll_id}/results", get(results_handler))
        .route("/polls/{poll_id}/recount", post(recount_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), ServerError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load().inspect_err(|e| error!("Invalid configuration: {e}"))?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    let router = app(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
