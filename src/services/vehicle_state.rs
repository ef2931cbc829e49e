//! Vehicle state store — last location, active route, route cursor, watchers.
//!
//! ARCHITECTURE
//! ============
//! Hot per-vehicle state lives outside the relational store so route streaming
//! never touches Postgres. The Redis layout is one key per fact:
//!
//!   vehicle:last_location:{id}   JSON `LatLng`
//!   vehicle:route:{id}           JSON array of `LatLng`
//!   vehicle:route_index:{id}     integer cursor into the route
//!   vehicle:{id}:users           set of watching user ids
//!
//! Setting a route always resets the cursor to zero; a new route has not been
//! traveled yet. An in-memory implementation backs single-process deployments
//! and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::protocol::LatLng;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

// =============================================================================
// TRAIT
// =============================================================================

/// Per-vehicle hot state. All methods are point reads/writes; consistency
/// across keys is the caller's concern.
#[async_trait]
pub trait VehicleStateStore: Send + Sync {
    async fn last_location(&self, vehicle_id: i64) -> Result<Option<LatLng>, StoreError>;
    async fn set_last_location(&self, vehicle_id: i64, location: LatLng) -> Result<(), StoreError>;

    async fn vehicle_route(&self, vehicle_id: i64) -> Result<Option<Vec<LatLng>>, StoreError>;
    /// Store a new route and reset the cursor to zero.
    async fn set_vehicle_route(&self, vehicle_id: i64, route: &[LatLng]) -> Result<(), StoreError>;

    async fn route_cursor(&self, vehicle_id: i64) -> Result<usize, StoreError>;
    async fn set_route_cursor(&self, vehicle_id: i64, cursor: usize) -> Result<(), StoreError>;

    async fn add_watcher(&self, vehicle_id: i64, user_id: i64) -> Result<(), StoreError>;
    async fn remove_watcher(&self, vehicle_id: i64, user_id: i64) -> Result<(), StoreError>;
    /// Watching user ids, sorted ascending.
    async fn watchers(&self, vehicle_id: i64) -> Result<Vec<i64>, StoreError>;
}

// =============================================================================
// REDIS
// =============================================================================

fn last_location_key(vehicle_id: i64) -> String {
    format!("vehicle:last_location:{vehicle_id}")
}

fn route_key(vehicle_id: i64) -> String {
    format!("vehicle:route:{vehicle_id}")
}

fn route_cursor_key(vehicle_id: i64) -> String {
    format!("vehicle:route_index:{vehicle_id}")
}

fn watchers_key(vehicle_id: i64) -> String {
    format!("vehicle:{vehicle_id}:users")
}

pub struct RedisVehicleStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisVehicleStore {
    #[must_use]
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl VehicleStateStore for RedisVehicleStore {
    async fn last_location(&self, vehicle_id: i64) -> Result<Option<LatLng>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(last_location_key(vehicle_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_last_location(&self, vehicle_id: i64, location: LatLng) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&location)?;
        conn.set::<_, _, ()>(last_location_key(vehicle_id), raw).await?;
        Ok(())
    }

    async fn vehicle_route(&self, vehicle_id: i64) -> Result<Option<Vec<LatLng>>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(route_key(vehicle_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_vehicle_route(&self, vehicle_id: i64, route: &[LatLng]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(route)?;
        conn.set::<_, _, ()>(route_key(vehicle_id), raw).await?;
        conn.set::<_, _, ()>(route_cursor_key(vehicle_id), 0).await?;
        Ok(())
    }

    async fn route_cursor(&self, vehicle_id: i64) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let cursor: Option<usize> = conn.get(route_cursor_key(vehicle_id)).await?;
        Ok(cursor.unwrap_or(0))
    }

    async fn set_route_cursor(&self, vehicle_id: i64, cursor: usize) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(route_cursor_key(vehicle_id), cursor).await?;
        Ok(())
    }

    async fn add_watcher(&self, vehicle_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(watchers_key(vehicle_id), user_id).await?;
        Ok(())
    }

    async fn remove_watcher(&self, vehicle_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(watchers_key(vehicle_id), user_id).await?;
        Ok(())
    }

    async fn watchers(&self, vehicle_id: i64) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.conn.clone();
        // SMEMBERS order is arbitrary; watcher lists are sorted everywhere.
        let mut out: Vec<i64> = conn.smembers(watchers_key(vehicle_id)).await?;
        out.sort_unstable();
        Ok(out)
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    last_locations: HashMap<i64, LatLng>,
    routes: HashMap<i64, Vec<LatLng>>,
    cursors: HashMap<i64, usize>,
    watchers: HashMap<i64, HashSet<i64>>,
}

/// Process-local store for deployments without Redis, and for tests.
#[derive(Default)]
pub struct MemoryVehicleStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryVehicleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VehicleStateStore for MemoryVehicleStore {
    async fn last_location(&self, vehicle_id: i64) -> Result<Option<LatLng>, StoreError> {
        Ok(self.inner.lock().await.last_locations.get(&vehicle_id).copied())
    }

    async fn set_last_location(&self, vehicle_id: i64, location: LatLng) -> Result<(), StoreError> {
        self.inner.lock().await.last_locations.insert(vehicle_id, location);
        Ok(())
    }

    async fn vehicle_route(&self, vehicle_id: i64) -> Result<Option<Vec<LatLng>>, StoreError> {
        Ok(self.inner.lock().await.routes.get(&vehicle_id).cloned())
    }

    async fn set_vehicle_route(&self, vehicle_id: i64, route: &[LatLng]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.routes.insert(vehicle_id, route.to_vec());
        inner.cursors.insert(vehicle_id, 0);
        Ok(())
    }

    async fn route_cursor(&self, vehicle_id: i64) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.cursors.get(&vehicle_id).copied().unwrap_or(0))
    }

    async fn set_route_cursor(&self, vehicle_id: i64, cursor: usize) -> Result<(), StoreError> {
        self.inner.lock().await.cursors.insert(vehicle_id, cursor);
        Ok(())
    }

    async fn add_watcher(&self, vehicle_id: i64, user_id: i64) -> Result<(), StoreError> {
        self.inner.lock().await.watchers.entry(vehicle_id).or_default().insert(user_id);
        Ok(())
    }

    async fn remove_watcher(&self, vehicle_id: i64, user_id: i64) -> Result<(), StoreError> {
        if let Some(set) = self.inner.lock().await.watchers.get_mut(&vehicle_id) {
            set.remove(&user_id);
        }
        Ok(())
    }

    async fn watchers(&self, vehicle_id: i64) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<i64> = inner
            .watchers
            .get(&vehicle_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        Ok(out)
    }
}

#[cfg(test)]
#[path = "vehicle_state_test.rs"]
mod tests;
