//! # coc-api
//!
//! Read-only HTTP surface over a coc trace store, plus an on-demand
//! verification endpoint. Consumed by the browser viewer and by CI.
//!
//! All state lives on disk under the home directory; every request reads
//! the current on-disk truth through the core stores. The server holds no
//! caches and is safe to run alongside producers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/traces` | List trace sessions, newest first |
//! | GET | `/api/traces/{trace_id}` | One trace session |
//! | GET | `/api/traces/{trace_id}/events` | Paginated events |
//! | GET | `/api/traces/{trace_id}/events/{event_id}` | One event |
//! | GET | `/api/artifacts/{artifact_hash}/metadata` | Artifact sidecar |
//! | GET | `/api/traces/{trace_id}/reports/latest` | Latest report |
//! | GET | `/api/traces/{trace_id}/reports/{report_id}` | One report |
//! | POST | `/api/traces/{trace_id}/verify` | Run the verifier |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use coc_core::home::CocHome;
use tracing::info;

/// Shared state for all API handlers.
pub(crate) struct ApiState {
    /// Root of the chain-of-custody store served by this process.
    pub home: CocHome,
}

/// Builds the API router over a home directory.
#[must_use]
pub fn router(home: CocHome) -> Router {
    let state = Arc::new(ApiState { home });
    Router::new()
        .route("/api/traces", get(handlers::list_traces))
        .route("/api/traces/:trace_id", get(handlers::get_trace))
        .route("/api/traces/:trace_id/events", get(handlers::list_events))
        .route(
            "/api/traces/:trace_id/events/:event_id",
            get(handlers::get_event),
        )
        .route(
            "/api/artifacts/:artifact_hash/metadata",
            get(handlers::get_artifact_metadata),
        )
        .route(
            "/api/traces/:trace_id/reports/latest",
            get(handlers::get_latest_report),
        )
        .route(
            "/api/traces/:trace_id/reports/:report_id",
            get(handlers::get_report),
        )
        .route("/api/traces/:trace_id/verify", post(handlers::verify_trace))
        .with_state(state)
}

/// Binds the listener and serves the API until the process exits.
///
/// Defaults favor local use: bind to loopback unless the operator
/// configures otherwise.
///
/// # Errors
///
/// Returns an I/O error if the address cannot be bound or the server
/// fails.
pub async fn serve(home: CocHome, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(home);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "coc API listening");
    axum::serve(listener, app).await
}
