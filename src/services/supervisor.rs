//! Vehicle task supervisor — at most one route stream per vehicle.
//!
//! ARCHITECTURE
//! ============
//! Dispatching a vehicle spawns a route stream. Re-dispatching the same
//! vehicle must first stop the old stream and wait for it to finish — two
//! streams walking the same vehicle would interleave contradictory cursor
//! writes. The registry lock is held across that await, so concurrent
//! redirects for one vehicle serialize instead of racing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::protocol::LatLng;
use crate::services::groups::GroupFabric;
use crate::services::routing::RouteProvider;
use crate::services::streamer::{self, StreamOutcome, StreamParams};
use crate::services::vehicle_state::{StoreError, VehicleStateStore};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No explicit origin and no stored last location to start from.
    #[error("No known location for vehicle {0}")]
    NoKnownLocation(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ActiveStream {
    cancel: CancellationToken,
    handle: JoinHandle<StreamOutcome>,
}

pub struct VehicleSupervisor {
    store: Arc<dyn VehicleStateStore>,
    provider: Arc<dyn RouteProvider>,
    fabric: Arc<GroupFabric>,
    interval: Duration,
    streams: Mutex<HashMap<i64, ActiveStream>>,
}

impl VehicleSupervisor {
    #[must_use]
    pub fn new(
        store: Arc<dyn VehicleStateStore>,
        provider: Arc<dyn RouteProvider>,
        fabric: Arc<GroupFabric>,
        interval: Duration,
    ) -> Self {
        Self { store, provider, fabric, interval, streams: Mutex::new(HashMap::new()) }
    }

    /// Start streaming `vehicle_id` toward `end`, replacing any stream
    /// already running for it. Returns once the new stream is spawned; the
    /// stream itself runs in the background.
    ///
    /// # Errors
    ///
    /// Returns `NoKnownLocation` when no origin is given and the vehicle has
    /// never reported a position.
    pub async fn dispatch(
        &self,
        vehicle_id: i64,
        end: LatLng,
        origin: Option<LatLng>,
    ) -> Result<(), DispatchError> {
        let start = match origin {
            Some(origin) => origin,
            None => self
                .store
                .last_location(vehicle_id)
                .await?
                .ok_or(DispatchError::NoKnownLocation(vehicle_id))?,
        };

        // Watchers are captured now; late subscribers ride the vehicle group.
        let watchers = self.store.watchers(vehicle_id).await?;

        let mut streams = self.streams.lock().await;
        if let Some(previous) = streams.remove(&vehicle_id) {
            previous.cancel.cancel();
            // Must fully stop before spawning the replacement. The lock stays
            // held, so a concurrent dispatch for this vehicle waits here too.
            match previous.handle.await {
                Ok(outcome) => {
                    info!(vehicle_id, ?outcome, "previous route stream stopped");
                }
                Err(e) if e.is_panic() => {
                    warn!(vehicle_id, "previous route stream panicked");
                }
                Err(_) => {}
            }
        }

        let cancel = CancellationToken::new();
        let params = StreamParams {
            vehicle_id,
            watchers,
            start,
            end,
            interval: self.interval,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(streamer::stream_vehicle_route(
            self.store.clone(),
            self.provider.clone(),
            self.fabric.clone(),
            params,
        ));
        streams.insert(vehicle_id, ActiveStream { cancel, handle });

        info!(vehicle_id, "route stream dispatched");
        Ok(())
    }

    /// Stop the stream for one vehicle, if any, and wait for it to finish.
    /// Returns whether a stream was still running.
    pub async fn stop(&self, vehicle_id: i64) -> bool {
        let mut streams = self.streams.lock().await;
        sweep(&mut streams);
        let Some(active) = streams.remove(&vehicle_id) else {
            return false;
        };
        active.cancel.cancel();
        if let Err(e) = active.handle.await {
            if e.is_panic() {
                warn!(vehicle_id, "route stream panicked during stop");
            }
        }
        true
    }

    /// Whether a stream is currently running for the vehicle.
    pub async fn is_streaming(&self, vehicle_id: i64) -> bool {
        let mut streams = self.streams.lock().await;
        sweep(&mut streams);
        streams.contains_key(&vehicle_id)
    }

    /// Number of streams still running.
    pub async fn active_count(&self) -> usize {
        let mut streams = self.streams.lock().await;
        sweep(&mut streams);
        streams.len()
    }
}

/// Drop entries whose task has already run to completion. Streams end on
/// their own once the route is walked, so the registry cleans out lazily on
/// the next access.
fn sweep(streams: &mut HashMap<i64, ActiveStream>) {
    streams.retain(|_, active| !active.handle.is_finished());
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod tests;
