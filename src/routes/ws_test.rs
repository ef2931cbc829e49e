use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::routes;
use crate::services::auth::test_tokens;
use crate::state::AppState;
use crate::state::test_helpers::{TEST_JWT_SECRET, test_state};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(state: AppState) -> String {
    let app = routes::app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("ws://{addr}/ws/fleet")
}

async fn connect(url: &str) -> WsClient {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await.expect("connect");
    ws
}

async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("ws error");
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json");
        }
    }
}

async fn send_json(ws: &mut WsClient, value: &Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into())).await.expect("send");
}

#[tokio::test]
async fn upgrade_requires_a_token() {
    let (state, _repo) = test_state();
    let url = spawn_server(state).await;

    let err = tokio_tungstenite::connect_async(&url).await.expect_err("should reject");
    let tungstenite::Error::Http(response) = err else {
        panic!("expected HTTP rejection, got {err:?}");
    };
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn upgrade_rejects_a_bad_token() {
    let (state, repo) = test_state();
    repo.add_user(1, "ADMIN");
    let url = spawn_server(state).await;

    let token = test_tokens::access(b"wrong-secret", 1, "ADMIN");
    let err = tokio_tungstenite::connect_async(format!("{url}?token={token}"))
        .await
        .expect_err("should reject");
    let tungstenite::Error::Http(response) = err else {
        panic!("expected HTTP rejection, got {err:?}");
    };
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn greets_then_routes_actions() {
    let (state, repo) = test_state();
    repo.add_user(1, "ADMIN");
    let url = spawn_server(state).await;

    let token = test_tokens::access(TEST_JWT_SECRET, 1, "ADMIN");
    let mut ws = connect(&format!("{url}?token={token}")).await;

    let greeting = next_json(&mut ws).await;
    assert_eq!(greeting["action"], "connected");
    assert_eq!(greeting["user_id"], 1);
    assert_eq!(greeting["role"], "ADMIN");

    send_json(&mut ws, &json!({"action": "nope"})).await;
    assert_eq!(next_json(&mut ws).await["error"], "Unknown action: nope");

    send_json(&mut ws, &json!({"action": "list_stations"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["action"], "list_stations_response");
    assert_eq!(reply["stations"], json!([]));
}

#[tokio::test]
async fn location_reports_fan_out_to_dispatchers() {
    let (state, repo) = test_state();
    repo.add_user(1, "DISPATCHER");
    repo.add_user(5, "RESPONDER");
    repo.add_vehicle(7);
    let url = spawn_server(state).await;

    let dispatcher_token = test_tokens::access(TEST_JWT_SECRET, 1, "DISPATCHER");
    let mut dispatcher = connect(&format!("{url}?token={dispatcher_token}")).await;
    assert_eq!(next_json(&mut dispatcher).await["action"], "connected");

    let responder_token = test_tokens::access(TEST_JWT_SECRET, 5, "RESPONDER");
    let mut responder = connect(&format!("{url}?token={responder_token}")).await;
    assert_eq!(next_json(&mut responder).await["action"], "connected");

    send_json(
        &mut responder,
        &json!({"action": "update_unit_location", "vehicle_id": 7, "lat": 40.75, "lng": -73.98}),
    )
    .await;

    // Responder sees their own confirmation; the dispatcher connection sees
    // the role-group broadcast.
    let confirmation = next_json(&mut responder).await;
    assert_eq!(confirmation["action"], "update_unit_location_response");

    let update = next_json(&mut dispatcher).await;
    assert_eq!(update["action"], "vehicle_location_update");
    assert_eq!(update["vehicle_id"], 7);
    assert_eq!(update["lat"], 40.75);
}

#[tokio::test]
async fn responder_cannot_list_incidents() {
    let (state, repo) = test_state();
    repo.add_user(5, "RESPONDER");
    let url = spawn_server(state).await;

    let token = test_tokens::access(TEST_JWT_SECRET, 5, "RESPONDER");
    let mut ws = connect(&format!("{url}?token={token}")).await;
    assert_eq!(next_json(&mut ws).await["action"], "connected");

    send_json(&mut ws, &json!({"action": "list_incidents"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["action"], "error");
    assert_eq!(reply["message"], "Unauthorized");
}

#[tokio::test]
async fn disconnect_clears_group_memberships() {
    let (state, repo) = test_state();
    repo.add_user(1, "ADMIN");
    repo.add_vehicle(7);
    let url = spawn_server(state.clone()).await;

    let token = test_tokens::access(TEST_JWT_SECRET, 1, "ADMIN");
    let mut ws = connect(&format!("{url}?token={token}")).await;
    assert_eq!(next_json(&mut ws).await["action"], "connected");

    send_json(&mut ws, &json!({"action": "subscribe_vehicle", "vehicle_id": 7})).await;
    assert_eq!(next_json(&mut ws).await["action"], "vehicle_subscribed");
    assert!(state.fabric.tracked_groups().await >= 4);

    ws.close(None).await.expect("close");
    drop(ws);

    // Cleanup is asynchronous; poll until the fabric is empty.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while state.fabric.tracked_groups().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "memberships not cleaned up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
