//! WebSocket gateway — authenticated fleet connections.
//!
//! DESIGN
//! ======
//! The upgrade is rejected outright (401) unless the `token` query parameter
//! resolves to a known user. On upgrade the connection joins its identity
//! groups (everyone, its role, its user id), greets the client, and enters a
//! `select!` loop:
//! - Incoming client messages → action router
//! - Group envelopes from the fabric → forward to the client
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → join groups → send `connected`
//! 2. Client sends actions → router returns sender envelopes; broadcasts go
//!    through the fabric
//! 3. Close → `leave_all` removes every group membership, including vehicle
//!    subscriptions

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{Data, Envelope};
use crate::services;
use crate::services::actions::ActionContext;
use crate::services::auth::Identity;
use crate::services::groups::Group;
use crate::state::AppState;

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.get("token") else {
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    };

    let Some(identity) =
        services::auth::authenticate(&state.verifier, state.repo.as_ref(), token).await
    else {
        return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response();
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    let conn_id = Uuid::new_v4();

    // Per-connection channel the fabric delivers group envelopes into.
    let (tx, mut rx) = mpsc::channel::<Envelope>(256);

    state.fabric.join(conn_id, &Group::All, tx.clone()).await;
    state.fabric.join(conn_id, &Group::Role(identity.role), tx.clone()).await;
    state.fabric.join(conn_id, &Group::User(identity.user_id), tx.clone()).await;

    let mut greeting = Data::new();
    greeting.insert("user_id".into(), json!(identity.user_id));
    greeting.insert("name".into(), json!(identity.name));
    greeting.insert("role".into(), json!(identity.role.as_str()));
    if send_envelope(&mut socket, &Envelope::event("connected", greeting)).await.is_err() {
        state.fabric.leave_all(conn_id).await;
        return;
    }

    info!(%conn_id, user_id = identity.user_id, role = %identity.role, "ws: client connected");

    let ctx = ActionContext {
        state: state.clone(),
        identity: Some(identity),
        conn_id,
        tx: tx.clone(),
    };

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = services::actions::dispatch(&ctx, &text).await;
                        let mut send_failed = false;
                        for envelope in replies {
                            if send_envelope(&mut socket, &envelope).await.is_err() {
                                send_failed = true;
                                break;
                            }
                        }
                        if send_failed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(envelope) = rx.recv() => {
                if send_envelope(&mut socket, &envelope).await.is_err() {
                    break;
                }
            }
        }
    }

    // Drops every membership this connection held, vehicle groups included.
    state.fabric.leave_all(conn_id).await;
    info!(%conn_id, "ws: client disconnected");
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), ()> {
    let json = match serde_json::to_string(envelope) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize envelope");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
