//! fleetline — real-time emergency fleet gateway.
//!
//! SYSTEM CONTEXT
//! ==============
//! One binary: an Axum server exposing the fleet websocket. State lives in
//! Postgres (incidents, vehicles, stations, users via stored procedures) and
//! Redis (hot per-vehicle state plus the cross-process group relay). Without
//! `REDIS_URL` the server still runs, single-process, with in-memory vehicle
//! state.

mod db;
mod protocol;
mod routes;
mod services;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::services::auth::TokenVerifier;
use crate::services::groups::{self, GroupFabric};
use crate::services::repo::{FleetRepo, PgFleetRepo};
use crate::services::routing::{DEFAULT_OSRM_BASE_URL, OsrmRouteProvider};
use crate::services::vehicle_state::{MemoryVehicleStore, RedisVehicleStore, VehicleStateStore};
use crate::state::AppState;

const DEFAULT_PORT: u16 = 3000;
/// Seconds between route waypoints, matching the field app's replay speed.
const DEFAULT_STREAM_INTERVAL_SECS: u64 = 5;

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let jwt_secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    let port: u16 = env_parse("PORT", DEFAULT_PORT);
    let stream_interval_secs: u64 = env_parse("STREAM_INTERVAL_SECS", DEFAULT_STREAM_INTERVAL_SECS);
    let osrm_base_url =
        std::env::var("OSRM_BASE_URL").unwrap_or_else(|_| DEFAULT_OSRM_BASE_URL.to_string());

    let pool = db::init_pool(&database_url).await.expect("database initialization failed");
    let repo: Arc<dyn FleetRepo> = Arc::new(PgFleetRepo::new(pool));

    // Redis is optional: without it there is no cross-process fan-out and
    // vehicle state does not survive a restart.
    let (store, fabric): (Arc<dyn VehicleStateStore>, Arc<GroupFabric>) =
        match std::env::var("REDIS_URL") {
            Ok(redis_url) => {
                let client = redis::Client::open(redis_url.as_str()).expect("invalid REDIS_URL");
                let conn = client
                    .get_multiplexed_async_connection()
                    .await
                    .expect("redis connection failed");
                let fabric = Arc::new(GroupFabric::with_relay(conn.clone()));
                let _relay = groups::spawn_relay(fabric.clone(), client);
                info!("redis connected; cross-process group relay active");
                (Arc::new(RedisVehicleStore::new(conn)), fabric)
            }
            Err(_) => {
                warn!("REDIS_URL not set; running single-process with in-memory vehicle state");
                (Arc::new(MemoryVehicleStore::new()), Arc::new(GroupFabric::new()))
            }
        };

    let state = AppState::new(
        repo,
        store,
        Arc::new(OsrmRouteProvider::new(osrm_base_url)),
        fabric,
        Arc::new(TokenVerifier::new(jwt_secret.as_bytes())),
        Duration::from_secs(stream_interval_secs),
    );

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("failed to bind listener");
    info!(port, "fleetline listening");
    axum::serve(listener, app).await.expect("server failed");
}
