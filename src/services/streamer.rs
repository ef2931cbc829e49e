//! Route streaming — replays a fetched route as timed location updates.
//!
//! DESIGN
//! ======
//! One stream per dispatched vehicle, spawned and owned by the supervisor.
//! The stream fetches the road route, stores it (resetting the cursor), then
//! walks it one waypoint per tick. For every waypoint, in order:
//!
//!   1. persist the cursor
//!   2. publish `vehicle_location_update` to the vehicle group and to every
//!      watcher captured at dispatch time
//!   3. persist the waypoint as the vehicle's last location
//!   4. sleep one interval (or stop if cancelled)
//!
//! Persisting before publishing means a subscriber who reads the store after
//! seeing an update never observes the store behind the wire.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::protocol::{Data, Envelope, LatLng};
use crate::services::groups::{Group, GroupFabric};
use crate::services::routing::RouteProvider;
use crate::services::vehicle_state::VehicleStateStore;

/// How a stream ended. Logged by the supervisor's wrapper task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Walked the whole route.
    Completed,
    /// Stopped by the supervisor (redirect or shutdown).
    Cancelled,
    /// Route fetch or store write failed; the stream stopped early.
    Failed,
}

/// Everything a stream needs, captured at dispatch time. Watchers are a
/// snapshot: users subscribing mid-stream receive updates through the vehicle
/// group instead.
pub struct StreamParams {
    pub vehicle_id: i64,
    pub watchers: Vec<i64>,
    pub start: LatLng,
    pub end: LatLng,
    pub interval: Duration,
    pub cancel: CancellationToken,
}

/// Drive one vehicle along a road route until done or cancelled.
pub async fn stream_vehicle_route(
    store: Arc<dyn VehicleStateStore>,
    provider: Arc<dyn RouteProvider>,
    fabric: Arc<GroupFabric>,
    params: StreamParams,
) -> StreamOutcome {
    let vehicle_id = params.vehicle_id;

    let route = tokio::select! {
        () = params.cancel.cancelled() => {
            publish_cancelled(&fabric, vehicle_id, &params.watchers).await;
            return StreamOutcome::Cancelled;
        }
        fetched = provider.fetch_route(params.start, params.end) => match fetched {
            Ok(route) => route,
            Err(e) => {
                error!(vehicle_id, error = %e, "route fetch failed");
                return StreamOutcome::Failed;
            }
        },
    };

    if route.is_empty() {
        warn!(vehicle_id, "provider returned an empty route");
        return StreamOutcome::Completed;
    }

    if let Err(e) = store.set_vehicle_route(vehicle_id, &route).await {
        error!(vehicle_id, error = %e, "failed to store route");
        return StreamOutcome::Failed;
    }

    // Announce the full plan before the first movement.
    let mut plan = Data::new();
    plan.insert("vehicle_id".into(), json!(vehicle_id));
    plan.insert("route".into(), serde_json::to_value(&route).unwrap_or_default());
    plan.insert("start".into(), serde_json::to_value(params.start).unwrap_or_default());
    plan.insert("end".into(), serde_json::to_value(params.end).unwrap_or_default());
    publish_to_all(&fabric, vehicle_id, &params.watchers, &Envelope::event("vehicle_route", plan))
        .await;

    info!(vehicle_id, waypoints = route.len(), "route stream started");

    for (cursor, waypoint) in route.iter().enumerate() {
        if let Err(e) = store.set_route_cursor(vehicle_id, cursor).await {
            error!(vehicle_id, cursor, error = %e, "failed to store route cursor");
            return StreamOutcome::Failed;
        }

        let mut data = Data::new();
        data.insert("vehicle_id".into(), json!(vehicle_id));
        data.insert("lat".into(), json!(waypoint.lat));
        data.insert("lng".into(), json!(waypoint.lng));
        data.insert("route_index".into(), json!(cursor));
        publish_to_all(
            &fabric,
            vehicle_id,
            &params.watchers,
            &Envelope::event("vehicle_location_update", data),
        )
        .await;

        if let Err(e) = store.set_last_location(vehicle_id, *waypoint).await {
            error!(vehicle_id, cursor, error = %e, "failed to store last location");
            return StreamOutcome::Failed;
        }

        tokio::select! {
            () = params.cancel.cancelled() => {
                publish_cancelled(&fabric, vehicle_id, &params.watchers).await;
                return StreamOutcome::Cancelled;
            }
            () = tokio::time::sleep(params.interval) => {}
        }
    }

    info!(vehicle_id, "route stream completed");
    StreamOutcome::Completed
}

/// Publish to the vehicle group and to each watcher's user group.
async fn publish_to_all(
    fabric: &GroupFabric,
    vehicle_id: i64,
    watchers: &[i64],
    envelope: &Envelope,
) {
    fabric.publish(&Group::Vehicle(vehicle_id), envelope).await;
    for user_id in watchers {
        fabric.publish(&Group::User(*user_id), envelope).await;
    }
}

async fn publish_cancelled(fabric: &GroupFabric, vehicle_id: i64, watchers: &[i64]) {
    let mut data = Data::new();
    data.insert("vehicle_id".into(), json!(vehicle_id));
    publish_to_all(fabric, vehicle_id, watchers, &Envelope::event("vehicle_route_cancelled", data))
        .await;
}

#[cfg(test)]
#[path = "streamer_test.rs"]
mod tests;
