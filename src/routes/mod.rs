//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The server exposes exactly two HTTP surfaces: the fleet websocket at
//! `/ws/fleet` and a health probe. Everything else — dashboards, the field
//! app, the account service — lives elsewhere and talks to us over the
//! socket.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/fleet", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
