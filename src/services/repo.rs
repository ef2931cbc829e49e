//! Fleet repository — typed access to the dispatch database.
//!
//! ARCHITECTURE
//! ============
//! All relational writes go through stored procedures owned by the database;
//! this layer binds arguments and maps rows, nothing more. The trait exists
//! so action handlers can be tested against an in-memory repository without a
//! live Postgres.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VehicleRecord {
    pub vehicle_id: i64,
    pub station_id: i64,
    pub capacity: i32,
    pub lat: f64,
    pub lng: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncidentRecord {
    pub incident_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub incident_type: String,
    pub lat: f64,
    pub lng: f64,
    pub severity_level: String,
    pub status: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StationRecord {
    pub station_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub station_type: String,
    pub zone: String,
    pub lat: f64,
    pub lng: f64,
}

// =============================================================================
// TRAIT
// =============================================================================

/// Everything the action handlers need from the relational store.
#[async_trait]
pub trait FleetRepo: Send + Sync {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, RepoError>;
    async fn get_all_admin_users(&self) -> Result<Vec<UserRecord>, RepoError>;
    async fn create_admin_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: &str,
    ) -> Result<UserRecord, RepoError>;
    async fn assign_responder_to_vehicle(
        &self,
        responder_id: i64,
        vehicle_id: i64,
    ) -> Result<bool, RepoError>;

    async fn get_all_incidents(&self, status: Option<&str>) -> Result<Vec<IncidentRecord>, RepoError>;
    async fn create_incident(
        &self,
        incident_type: &str,
        lat: f64,
        lng: f64,
        severity_level: &str,
        description: Option<&str>,
    ) -> Result<IncidentRecord, RepoError>;
    async fn resolve_incident(&self, incident_id: i64) -> Result<Option<IncidentRecord>, RepoError>;
    /// Record a dispatch of `vehicle_id` to `incident_id`, replacing any
    /// previous dispatch for that incident.
    async fn reassign_dispatch(
        &self,
        incident_id: i64,
        vehicle_id: i64,
        dispatcher_id: i64,
    ) -> Result<Option<IncidentRecord>, RepoError>;
    async fn dispatches_for_incident(
        &self,
        incident_id: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, RepoError>;
    async fn get_vehicle_for_incident(
        &self,
        incident_id: i64,
    ) -> Result<Option<VehicleRecord>, RepoError>;

    async fn get_all_vehicles(&self, status: Option<&str>) -> Result<Vec<VehicleRecord>, RepoError>;
    async fn get_vehicle_by_id(&self, vehicle_id: i64) -> Result<Option<VehicleRecord>, RepoError>;
    async fn create_vehicle(
        &self,
        station_id: i64,
        capacity: i32,
        lat: f64,
        lng: f64,
    ) -> Result<VehicleRecord, RepoError>;
    async fn delete_vehicle(&self, vehicle_id: i64) -> Result<bool, RepoError>;
    async fn update_vehicle_location(
        &self,
        vehicle_id: i64,
        lat: f64,
        lng: f64,
    ) -> Result<Option<VehicleRecord>, RepoError>;
    /// Flip a pending vehicle to `ON_ROUTE`. Returns the updated row, or
    /// `None` when the vehicle does not exist.
    async fn mark_vehicle_on_route(&self, vehicle_id: i64) -> Result<Option<VehicleRecord>, RepoError>;

    async fn get_all_stations(&self) -> Result<Vec<StationRecord>, RepoError>;
    async fn create_station(
        &self,
        station_type: &str,
        zone: &str,
        lat: f64,
        lng: f64,
    ) -> Result<StationRecord, RepoError>;

    async fn analytics_summary(&self) -> Result<serde_json::Value, RepoError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgFleetRepo {
    pool: PgPool,
}

impl PgFleetRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FleetRepo for PgFleetRepo {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, RepoError> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM get_user_by_user_id($1)")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_all_admin_users(&self) -> Result<Vec<UserRecord>, RepoError> {
        let users = sqlx::query_as::<_, UserRecord>("SELECT * FROM get_all_admin_users()")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn create_admin_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: &str,
    ) -> Result<UserRecord, RepoError> {
        let user =
            sqlx::query_as::<_, UserRecord>("SELECT * FROM create_admin_user($1, $2, $3, $4)")
                .bind(email)
                .bind(password)
                .bind(name)
                .bind(role)
                .fetch_one(&self.pool)
                .await?;
        Ok(user)
    }

    async fn assign_responder_to_vehicle(
        &self,
        responder_id: i64,
        vehicle_id: i64,
    ) -> Result<bool, RepoError> {
        let assigned: bool =
            sqlx::query_scalar("SELECT assign_responder_to_vehicle($1, $2)")
                .bind(responder_id)
                .bind(vehicle_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(assigned)
    }

    async fn get_all_incidents(&self, status: Option<&str>) -> Result<Vec<IncidentRecord>, RepoError> {
        let incidents = sqlx::query_as::<_, IncidentRecord>("SELECT * FROM get_all_incidents($1)")
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
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
        let incident =
            sqlx::query_as::<_, IncidentRecord>("SELECT * FROM create_incident($1, $2, $3, $4, $5)")
                .bind(incident_type)
                .bind(lat)
                .bind(lng)
                .bind(severity_level)
                .bind(description)
                .fetch_one(&self.pool)
                .await?;
        Ok(incident)
    }

    async fn resolve_incident(&self, incident_id: i64) -> Result<Option<IncidentRecord>, RepoError> {
        let incident = sqlx::query_as::<_, IncidentRecord>("SELECT * FROM resolve_incident($1)")
            .bind(incident_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(incident)
    }

    async fn reassign_dispatch(
        &self,
        incident_id: i64,
        vehicle_id: i64,
        dispatcher_id: i64,
    ) -> Result<Option<IncidentRecord>, RepoError> {
        let incident =
            sqlx::query_as::<_, IncidentRecord>("SELECT * FROM reassign_dispatch($1, $2, $3)")
                .bind(incident_id)
                .bind(vehicle_id)
                .bind(dispatcher_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(incident)
    }

    async fn dispatches_for_incident(
        &self,
        incident_id: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, RepoError> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT to_jsonb(d) FROM get_dispatches_by_incident($1) d")
                .bind(incident_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    async fn get_vehicle_for_incident(
        &self,
        incident_id: i64,
    ) -> Result<Option<VehicleRecord>, RepoError> {
        let vehicle =
            sqlx::query_as::<_, VehicleRecord>("SELECT * FROM get_vehicle_by_incident($1)")
                .bind(incident_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(vehicle)
    }

    async fn get_all_vehicles(&self, status: Option<&str>) -> Result<Vec<VehicleRecord>, RepoError> {
        let vehicles = sqlx::query_as::<_, VehicleRecord>("SELECT * FROM get_all_vehicles($1)")
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(vehicles)
    }

    async fn get_vehicle_by_id(&self, vehicle_id: i64) -> Result<Option<VehicleRecord>, RepoError> {
        let vehicle = sqlx::query_as::<_, VehicleRecord>("SELECT * FROM get_vehicle_by_id($1)")
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(vehicle)
    }

    async fn create_vehicle(
        &self,
        station_id: i64,
        capacity: i32,
        lat: f64,
        lng: f64,
    ) -> Result<VehicleRecord, RepoError> {
        let vehicle =
            sqlx::query_as::<_, VehicleRecord>("SELECT * FROM create_vehicle($1, $2, $3, $4)")
                .bind(station_id)
                .bind(capacity)
                .bind(lat)
                .bind(lng)
                .fetch_one(&self.pool)
                .await?;
        Ok(vehicle)
    }

    async fn delete_vehicle(&self, vehicle_id: i64) -> Result<bool, RepoError> {
        let deleted: bool = sqlx::query_scalar("SELECT delete_vehicle($1)")
            .bind(vehicle_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(deleted)
    }

    async fn update_vehicle_location(
        &self,
        vehicle_id: i64,
        lat: f64,
        lng: f64,
    ) -> Result<Option<VehicleRecord>, RepoError> {
        let vehicle =
            sqlx::query_as::<_, VehicleRecord>("SELECT * FROM update_vehicle_location($1, $2, $3)")
                .bind(vehicle_id)
                .bind(lat)
                .bind(lng)
                .fetch_optional(&self.pool)
                .await?;
        Ok(vehicle)
    }

    async fn mark_vehicle_on_route(&self, vehicle_id: i64) -> Result<Option<VehicleRecord>, RepoError> {
        let vehicle =
            sqlx::query_as::<_, VehicleRecord>("SELECT * FROM mark_vehicle_on_route($1)")
                .bind(vehicle_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(vehicle)
    }

    async fn get_all_stations(&self) -> Result<Vec<StationRecord>, RepoError> {
        let stations = sqlx::query_as::<_, StationRecord>("SELECT * FROM get_all_stations()")
            .fetch_all(&self.pool)
            .await?;
        Ok(stations)
    }

    async fn create_station(
        &self,
        station_type: &str,
        zone: &str,
        lat: f64,
        lng: f64,
    ) -> Result<StationRecord, RepoError> {
        let station =
            sqlx::query_as::<_, StationRecord>("SELECT * FROM create_station($1, $2, $3, $4)")
                .bind(station_type)
                .bind(zone)
                .bind(lat)
                .bind(lng)
                .fetch_one(&self.pool)
                .await?;
        Ok(station)
    }

    async fn analytics_summary(&self) -> Result<serde_json::Value, RepoError> {
        let avg_response_secs: Option<f64> =
            sqlx::query_scalar("SELECT get_average_response_time()")
                .fetch_one(&self.pool)
                .await?;
        let incidents_by_type: Vec<(String, i64)> =
            sqlx::query_as("SELECT * FROM get_incident_counts_by_type()")
                .fetch_all(&self.pool)
                .await?;
        let vehicles_by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT * FROM get_vehicle_counts_by_status()")
                .fetch_all(&self.pool)
                .await?;
        let busiest_station: Option<(i64, i64)> =
            sqlx::query_as("SELECT * FROM get_busiest_station()")
                .fetch_optional(&self.pool)
                .await?;

        Ok(json!({
            "average_response_time_secs": avg_response_secs,
            "incidents_by_type": incidents_by_type
                .into_iter()
                .map(|(kind, count)| json!({"type": kind, "count": count}))
                .collect::<Vec<_>>(),
            "vehicles_by_status": vehicles_by_status
                .into_iter()
                .map(|(status, count)| json!({"status": status, "count": count}))
                .collect::<Vec<_>>(),
            "busiest_station": busiest_station
                .map(|(station_id, dispatches)| json!({"station_id": station_id, "dispatches": dispatches})),
        }))
    }
}
