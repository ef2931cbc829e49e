//! Shared application state.
//!
//! SYSTEM CONTEXT
//! ==============
//! One `AppState` is built at startup and cloned into every websocket
//! connection. Everything inside is an `Arc`, so a clone is a handful of
//! refcount bumps. The seams (repository, state store, route provider) are
//! trait objects so tests can swap in in-memory implementations.

use std::sync::Arc;
use std::time::Duration;

use crate::services::auth::TokenVerifier;
use crate::services::groups::GroupFabric;
use crate::services::repo::FleetRepo;
use crate::services::routing::RouteProvider;
use crate::services::supervisor::VehicleSupervisor;
use crate::services::vehicle_state::VehicleStateStore;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn FleetRepo>,
    pub store: Arc<dyn VehicleStateStore>,
    pub fabric: Arc<GroupFabric>,
    pub supervisor: Arc<VehicleSupervisor>,
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    #[must_use]
    pub fn new(
        repo: Arc<dyn FleetRepo>,
        store: Arc<dyn VehicleStateStore>,
        provider: Arc<dyn RouteProvider>,
        fabric: Arc<GroupFabric>,
        verifier: Arc<TokenVerifier>,
        stream_interval: Duration,
    ) -> Self {
        let supervisor = Arc::new(VehicleSupervisor::new(
            store.clone(),
            provider,
            fabric.clone(),
            stream_interval,
        ));
        Self { repo, store, fabric, supervisor, verifier }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::AppState;
    use crate::protocol::LatLng;
    use crate::services::auth::TokenVerifier;
    use crate::services::groups::GroupFabric;
    use crate::services::repo::{
        FleetRepo, IncidentRecord, RepoError, StationRecord, UserRecord, VehicleRecord,
    };
    use crate::services::routing::{ProviderError, RouteProvider};
    use crate::services::vehicle_state::MemoryVehicleStore;

    pub const TEST_JWT_SECRET: &[u8] = b"fleetline-test-secret";

    /// Fast enough that multi-waypoint streams finish within a test.
    pub const TEST_STREAM_INTERVAL: Duration = Duration::from_millis(5);

    // -------------------------------------------------------------------------
    // Mock repository
    // -------------------------------------------------------------------------

    #[derive(Default)]
    pub struct MockRepo {
        pub users: Mutex<HashMap<i64, UserRecord>>,
        pub vehicles: Mutex<HashMap<i64, VehicleRecord>>,
        pub incidents: Mutex<HashMap<i64, IncidentRecord>>,
        pub stations: Mutex<Vec<StationRecord>>,
        /// (responder_id, vehicle_id) pairs, in call order.
        pub assignments: Mutex<Vec<(i64, i64)>>,
        /// (incident_id, vehicle_id, dispatcher_id) tuples, in call order.
        pub dispatches: Mutex<Vec<(i64, i64, i64)>>,
        next_id: AtomicI64,
    }

    impl MockRepo {
        pub fn new() -> Arc<Self> {
            Arc::new(Self { next_id: AtomicI64::new(1000), ..Self::default() })
        }

        fn next_id(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::Relaxed)
        }

        pub fn add_user(&self, user_id: i64, role: &str) -> UserRecord {
            let user = UserRecord {
                user_id,
                email: format!("user{user_id}@fleet.test"),
                name: format!("User {user_id}"),
                role: role.to_string(),
            };
            self.users.lock().unwrap().insert(user_id, user.clone());
            user
        }

        pub fn add_vehicle(&self, vehicle_id: i64) -> VehicleRecord {
            let vehicle = VehicleRecord {
                vehicle_id,
                station_id: 1,
                capacity: 4,
                lat: 40.0,
                lng: -74.0,
                status: "AVAILABLE".to_string(),
            };
            self.vehicles.lock().unwrap().insert(vehicle_id, vehicle.clone());
            vehicle
        }

        pub fn add_incident(&self, incident_id: i64) -> IncidentRecord {
            let incident = IncidentRecord {
                incident_id,
                incident_type: "FIRE".to_string(),
                lat: 40.1,
                lng: -74.1,
                severity_level: "HIGH".to_string(),
                status: "REPORTED".to_string(),
                description: None,
            };
            self.incidents.lock().unwrap().insert(incident_id, incident.clone());
            incident
        }
    }

    #[async_trait]
    impl FleetRepo for MockRepo {
        async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, RepoError> {
            Ok(self.users.lock().unwrap().get(&user_id).cloned())
        }

        async fn get_all_admin_users(&self) -> Result<Vec<UserRecord>, RepoError> {
            let mut users: Vec<UserRecord> = self
                .users
                .lock()
                .unwrap()
                .values()
                .filter(|u| u.role != "RESPONDER")
                .cloned()
                .collect();
            users.sort_by_key(|u| u.user_id);
            Ok(users)
        }

        async fn create_admin_user(
            &self,
            email: &str,
            _password: &str,
            name: &str,
            role: &str,
        ) -> Result<UserRecord, RepoError> {
            let user = UserRecord {
                user_id: self.next_id(),
                email: email.to_string(),
                name: name.to_string(),
                role: role.to_string(),
            };
            self.users.lock().unwrap().insert(user.user_id, user.clone());
            Ok(user)
        }

        async fn assign_responder_to_vehicle(
            &self,
            responder_id: i64,
            vehicle_id: i64,
        ) -> Result<bool, RepoError> {
            let known = self.users.lock().unwrap().contains_key(&responder_id)
                && self.vehicles.lock().unwrap().contains_key(&vehicle_id);
            if known {
                self.assignments.lock().unwrap().push((responder_id, vehicle_id));
            }
            Ok(known)
        }

        async fn get_all_incidents(
            &self,
            status: Option<&str>,
        ) -> Result<Vec<IncidentRecord>, RepoError> {
            let mut incidents: Vec<IncidentRecord> = self
                .incidents
                .lock()
                .unwrap()
                .values()
                .filter(|i| status.is_none_or(|s| i.status == s))
                .cloned()
                .collect();
            incidents.sort_by_key(|i| i.incident_id);
            Ok(incidents)
        }

        async fn create_incident(
            &self,
            incident_type: &str,
            lat: f64,
            lng: f64,
            severity_level: &str,
            description: Option<&str>,
        ) -> Result<IncidentRecord, RepoError> {
            let incident = IncidentRecord {
                incident_id: self.next_id(),
                incident_type: incident_type.to_string(),
                lat,
                lng,
                severity_level: severity_level.to_string(),
                status: "REPORTED".to_string(),
                description: description.map(str::to_string),
            };
            self.incidents.lock().unwrap().insert(incident.incident_id, incident.clone());
            Ok(incident)
        }

        async fn resolve_incident(
            &self,
            incident_id: i64,
        ) -> Result<Option<IncidentRecord>, RepoError> {
            let mut incidents = self.incidents.lock().unwrap();
            let Some(incident) = incidents.get_mut(&incident_id) else {
                return Ok(None);
            };
            incident.status = "RESOLVED".to_string();
            Ok(Some(incident.clone()))
        }

        async fn reassign_dispatch(
            &self,
            incident_id: i64,
            vehicle_id: i64,
            dispatcher_id: i64,
        ) -> Result<Option<IncidentRecord>, RepoError> {
            let mut incidents = self.incidents.lock().unwrap();
            let Some(incident) = incidents.get_mut(&incident_id) else {
                return Ok(None);
            };
            incident.status = "DISPATCHED".to_string();
            self.dispatches.lock().unwrap().push((incident_id, vehicle_id, dispatcher_id));
            Ok(Some(incident.clone()))
        }

        async fn dispatches_for_incident(
            &self,
            incident_id: Option<i64>,
        ) -> Result<Vec<serde_json::Value>, RepoError> {
            Ok(self
                .dispatches
                .lock()
                .unwrap()
                .iter()
                .filter(|(iid, _, _)| incident_id.is_none_or(|want| *iid == want))
                .map(|(iid, vid, did)| {
                    json!({"incident_id": iid, "vehicle_id": vid, "dispatcher_id": did})
                })
                .collect())
        }

        async fn get_vehicle_for_incident(
            &self,
            incident_id: i64,
        ) -> Result<Option<VehicleRecord>, RepoError> {
            let vehicle_id = self
                .dispatches
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(iid, _, _)| *iid == incident_id)
                .map(|(_, vid, _)| *vid);
            Ok(vehicle_id.and_then(|vid| self.vehicles.lock().unwrap().get(&vid).cloned()))
        }

        async fn get_all_vehicles(
            &self,
            status: Option<&str>,
        ) -> Result<Vec<VehicleRecord>, RepoError> {
            let mut vehicles: Vec<VehicleRecord> = self
                .vehicles
                .lock()
                .unwrap()
                .values()
                .filter(|v| status.is_none_or(|s| v.status == s))
                .cloned()
                .collect();
            vehicles.sort_by_key(|v| v.vehicle_id);
            Ok(vehicles)
        }

        async fn get_vehicle_by_id(
            &self,
            vehicle_id: i64,
        ) -> Result<Option<VehicleRecord>, RepoError> {
            Ok(self.vehicles.lock().unwrap().get(&vehicle_id).cloned())
        }

        async fn create_vehicle(
            &self,
            station_id: i64,
            capacity: i32,
            lat: f64,
            lng: f64,
        ) -> Result<VehicleRecord, RepoError> {
            let vehicle = VehicleRecord {
                vehicle_id: self.next_id(),
                station_id,
                capacity,
                lat,
                lng,
                status: "AVAILABLE".to_string(),
            };
            self.vehicles.lock().unwrap().insert(vehicle.vehicle_id, vehicle.clone());
            Ok(vehicle)
        }

        async fn delete_vehicle(&self, vehicle_id: i64) -> Result<bool, RepoError> {
            Ok(self.vehicles.lock().unwrap().remove(&vehicle_id).is_some())
        }

        async fn update_vehicle_location(
            &self,
            vehicle_id: i64,
            lat: f64,
            lng: f64,
        ) -> Result<Option<VehicleRecord>, RepoError> {
            let mut vehicles = self.vehicles.lock().unwrap();
            let Some(vehicle) = vehicles.get_mut(&vehicle_id) else {
                return Ok(None);
            };
            vehicle.lat = lat;
            vehicle.lng = lng;
            Ok(Some(vehicle.clone()))
        }

        async fn mark_vehicle_on_route(
            &self,
            vehicle_id: i64,
        ) -> Result<Option<VehicleRecord>, RepoError> {
            let mut vehicles = self.vehicles.lock().unwrap();
            let Some(vehicle) = vehicles.get_mut(&vehicle_id) else {
                return Ok(None);
            };
            vehicle.status = "ON_ROUTE".to_string();
            Ok(Some(vehicle.clone()))
        }

        async fn get_all_stations(&self) -> Result<Vec<StationRecord>, RepoError> {
            Ok(self.stations.lock().unwrap().clone())
        }

        async fn create_station(
            &self,
            station_type: &str,
            zone: &str,
            lat: f64,
            lng: f64,
        ) -> Result<StationRecord, RepoError> {
            let station = StationRecord {
                station_id: self.next_id(),
                station_type: station_type.to_string(),
                zone: zone.to_string(),
                lat,
                lng,
            };
            self.stations.lock().unwrap().push(station.clone());
            Ok(station)
        }

        async fn analytics_summary(&self) -> Result<serde_json::Value, RepoError> {
            Ok(json!({
                "average_response_time_secs": 145.0,
                "incidents_by_type": [{"type": "FIRE", "count": 3}],
                "vehicles_by_status": [{"status": "AVAILABLE", "count": 2}],
                "busiest_station": {"station_id": 1, "dispatches": 3},
            }))
        }
    }

    // -------------------------------------------------------------------------
    // Route providers
    // -------------------------------------------------------------------------

    /// Always returns the same route, whatever the endpoints.
    pub struct FixedRouteProvider {
        pub route: Vec<LatLng>,
    }

    impl FixedRouteProvider {
        pub fn three_points() -> Self {
            Self {
                route: vec![
                    LatLng::new(0.0, 0.0),
                    LatLng::new(0.5, 0.5),
                    LatLng::new(1.0, 1.0),
                ],
            }
        }
    }

    #[async_trait]
    impl RouteProvider for FixedRouteProvider {
        async fn fetch_route(
            &self,
            _start: LatLng,
            _end: LatLng,
        ) -> Result<Vec<LatLng>, ProviderError> {
            Ok(self.route.clone())
        }
    }

    /// Always fails, as if the routing service were unreachable.
    pub struct FailingRouteProvider;

    #[async_trait]
    impl RouteProvider for FailingRouteProvider {
        async fn fetch_route(
            &self,
            _start: LatLng,
            _end: LatLng,
        ) -> Result<Vec<LatLng>, ProviderError> {
            Err(ProviderError::MalformedResponse)
        }
    }

    // -------------------------------------------------------------------------
    // Assembled state
    // -------------------------------------------------------------------------

    pub fn test_state() -> (AppState, Arc<MockRepo>) {
        let repo = MockRepo::new();
        let state =
            test_state_with_provider(repo.clone(), Arc::new(FixedRouteProvider::three_points()));
        (state, repo)
    }

    pub fn test_state_with_provider(
        repo: Arc<MockRepo>,
        provider: Arc<dyn RouteProvider>,
    ) -> AppState {
        AppState::new(
            repo,
            Arc::new(MemoryVehicleStore::new()),
            provider,
            Arc::new(GroupFabric::new()),
            Arc::new(TokenVerifier::new(TEST_JWT_SECRET)),
            TEST_STREAM_INTERVAL,
        )
    }
}
