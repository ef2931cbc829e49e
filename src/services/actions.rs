//! Action router — static handler table with per-action authorization.
//!
//! ARCHITECTURE
//! ============
//! Every inbound websocket message names an `action`. The router looks the
//! action up in a static table, checks the caller's access level, and runs
//! the handler. Handlers are pure business logic: they validate arguments,
//! call the repository/state store/supervisor, and return a [`Reply`]. The
//! router owns all outbound concerns — naming the response event, honoring
//! `to_user_id` redirects, and turning errors into error envelopes.
//!
//! ERROR HANDLING
//! ==============
//! Three layers, three shapes:
//! - unparseable or unknown messages → `{"error": ...}` (protocol error)
//! - authorization and handler failures → `{"action": "error", "message": ...}`
//! - handler successes → `{"action": "<name>_response", ...}` unless the
//!   handler names the event itself

use std::collections::HashMap;
use std::sync::OnceLock;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ActionRequest, Data, Envelope, LatLng};
use crate::services::auth::{Identity, Role};
use crate::services::groups::Group;
use crate::services::repo::RepoError;
use crate::services::supervisor::DispatchError;
use crate::services::vehicle_state::StoreError;
use crate::state::AppState;

/// Emergency service categories. Incidents and stations are both typed by
/// the service they involve.
const SERVICE_TYPES: [&str; 3] = ["FIRE", "POLICE", "MEDICAL"];
const SEVERITY_LEVELS: [&str; 4] = ["LOW", "MEDIUM", "HIGH", "CRITICAL"];
/// Roles assignable through `create_admin`. Responders come from the field
/// app's own signup flow.
const CREATABLE_ROLES: [&str; 2] = ["ADMIN", "DISPATCHER"];

// =============================================================================
// CONTEXT + OUTCOME
// =============================================================================

/// Per-connection context handed to every handler.
#[derive(Clone)]
pub struct ActionContext {
    pub state: AppState,
    /// `None` only in direct router tests; the gateway rejects unauthenticated
    /// upgrades before any action can arrive.
    pub identity: Option<Identity>,
    pub conn_id: Uuid,
    /// The connection's own outbound channel, for group joins.
    pub tx: mpsc::Sender<Envelope>,
}

/// What a successful handler hands back to the router.
pub struct Reply {
    /// Event name override. `None` means `<action>_response`.
    action: Option<&'static str>,
    data: Data,
    /// Additional envelopes for the sender only (e.g. a route snapshot after
    /// subscribing). Never redirected by `to_user_id`.
    extra: Vec<Envelope>,
}

impl Reply {
    fn data(data: Data) -> Self {
        Self { action: None, data, extra: Vec::new() }
    }

    fn named(action: &'static str, data: Data) -> Self {
        Self { action: Some(action), data, extra: Vec::new() }
    }

    fn with_extra(mut self, envelope: Envelope) -> Self {
        self.extra.push(envelope);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid {0}")]
    InvalidField(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Repo(#[from] RepoError),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// =============================================================================
// ACTION TABLE
// =============================================================================

/// Who may invoke an action.
#[derive(Clone, Copy)]
pub enum Access {
    /// Any connection, authenticated or not.
    Public,
    /// Any authenticated caller.
    Authenticated,
    /// Authenticated callers holding one of the listed roles.
    Roles(&'static [Role]),
}

impl Access {
    fn permits(self, identity: Option<&Identity>) -> bool {
        match self {
            Access::Public => true,
            Access::Authenticated => identity.is_some(),
            Access::Roles(roles) => identity.is_some_and(|id| roles.contains(&id.role)),
        }
    }
}

type HandlerFn = fn(ActionContext, Data) -> BoxFuture<'static, Result<Reply, HandlerError>>;

pub struct ActionDef {
    pub access: Access,
    handler: HandlerFn,
}

fn boxed<F>(future: F) -> BoxFuture<'static, Result<Reply, HandlerError>>
where
    F: std::future::Future<Output = Result<Reply, HandlerError>> + Send + 'static,
{
    Box::pin(future)
}

static ACTIONS: OnceLock<HashMap<&'static str, ActionDef>> = OnceLock::new();

/// The full action table. Built once, never mutated.
pub fn action_table() -> &'static HashMap<&'static str, ActionDef> {
    ACTIONS.get_or_init(build_table)
}

#[allow(clippy::too_many_lines)]
fn build_table() -> HashMap<&'static str, ActionDef> {
    use Role::{Admin, Dispatcher, Responder};

    let mut table: HashMap<&'static str, ActionDef> = HashMap::new();
    let mut add = |name: &'static str, access: Access, handler: HandlerFn| {
        table.insert(name, ActionDef { access, handler });
    };

    add("send_message", Access::Public, |ctx, data| boxed(send_message(ctx, data)));
    add("get_analytics", Access::Authenticated, |ctx, data| boxed(get_analytics(ctx, data)));

    add("report_incident", Access::Public, |ctx, data| boxed(report_incident(ctx, data)));
    add("list_incidents", Access::Roles(&[Admin, Dispatcher]), |ctx, data| {
        boxed(list_incidents(ctx, data))
    });
    add("resolve_incident", Access::Authenticated, |ctx, data| boxed(resolve_incident(ctx, data)));
    add("dispatch_incident", Access::Roles(&[Admin, Dispatcher]), |ctx, data| {
        boxed(dispatch_incident(ctx, data))
    });
    add("get_incident_dispatches", Access::Roles(&[Admin, Dispatcher]), |ctx, data| {
        boxed(get_incident_dispatches(ctx, data))
    });
    add("get_vehicle_for_incident", Access::Roles(&[Admin, Dispatcher, Responder]), |ctx, data| {
        boxed(get_vehicle_for_incident(ctx, data))
    });

    add("list_vehicles", Access::Roles(&[Admin, Dispatcher]), |ctx, data| {
        boxed(list_vehicles(ctx, data))
    });
    add("create_vehicle", Access::Roles(&[Admin]), |ctx, data| boxed(create_vehicle(ctx, data)));
    add("delete_vehicle", Access::Roles(&[Admin]), |ctx, data| boxed(delete_vehicle(ctx, data)));
    add("update_unit_location", Access::Authenticated, |ctx, data| {
        boxed(update_unit_location(ctx, data))
    });
    add("mark_vehicle_on_route", Access::Roles(&[Admin, Responder]), |ctx, data| {
        boxed(mark_vehicle_on_route(ctx, data))
    });
    add("dispatch_vehicle", Access::Roles(&[Admin, Dispatcher]), |ctx, data| {
        boxed(dispatch_vehicle(ctx, data))
    });
    add("subscribe_vehicle", Access::Authenticated, |ctx, data| {
        boxed(subscribe_vehicle(ctx, data))
    });
    add("unsubscribe_vehicle", Access::Authenticated, |ctx, data| {
        boxed(unsubscribe_vehicle(ctx, data))
    });

    add("list_stations", Access::Roles(&[Admin, Dispatcher]), |ctx, data| {
        boxed(list_stations(ctx, data))
    });
    add("create_station", Access::Roles(&[Admin]), |ctx, data| boxed(create_station(ctx, data)));

    add("list_admins", Access::Roles(&[Admin]), |ctx, data| boxed(list_admins(ctx, data)));
    add("create_admin", Access::Roles(&[Admin]), |ctx, data| boxed(create_admin(ctx, data)));
    add("assign_responder_to_vehicle", Access::Roles(&[Admin]), |ctx, data| {
        boxed(assign_responder_to_vehicle(ctx, data))
    });

    table
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Process one inbound text message. Returns the envelopes owed to the
/// sender; group broadcasts have already been published when this returns.
pub async fn dispatch(ctx: &ActionContext, text: &str) -> Vec<Envelope> {
    let request = match ActionRequest::parse(text) {
        Ok(request) => request,
        Err(e) => return vec![Envelope::protocol_error(e.to_string())],
    };

    let Some(def) = action_table().get(request.action.as_str()) else {
        return vec![Envelope::protocol_error(format!("Unknown action: {}", request.action))];
    };

    if !def.access.permits(ctx.identity.as_ref()) {
        warn!(%ctx.conn_id, action = %request.action, "action denied");
        return vec![Envelope::error("Unauthorized")];
    }

    info!(%ctx.conn_id, action = %request.action, "action received");

    match (def.handler)(ctx.clone(), request.data).await {
        Ok(reply) => {
            let action = reply
                .action
                .map_or_else(|| format!("{}_response", request.action), str::to_string);
            let envelope = Envelope::event(action, reply.data);
            let mut out = reply.extra;
            if let Some(user_id) = request.to_user_id {
                // Redirected reply: the target user's connections get it, the
                // sender only sees their own extras.
                ctx.state.fabric.publish(&Group::User(user_id), &envelope).await;
            } else {
                out.push(envelope);
            }
            out
        }
        Err(e) => {
            warn!(%ctx.conn_id, action = %request.action, error = %e, "action failed");
            vec![Envelope::error(e.to_string())]
        }
    }
}

// =============================================================================
// FIELD EXTRACTION
// =============================================================================

fn require_i64(data: &Data, field: &'static str) -> Result<i64, HandlerError> {
    match data.get(field) {
        None => Err(HandlerError::MissingField(field)),
        Some(value) => value.as_i64().ok_or(HandlerError::InvalidField(field)),
    }
}

fn require_f64(data: &Data, field: &'static str) -> Result<f64, HandlerError> {
    match data.get(field) {
        None => Err(HandlerError::MissingField(field)),
        Some(value) => value.as_f64().ok_or(HandlerError::InvalidField(field)),
    }
}

fn require_str<'a>(data: &'a Data, field: &'static str) -> Result<&'a str, HandlerError> {
    match data.get(field) {
        None => Err(HandlerError::MissingField(field)),
        Some(value) => value.as_str().ok_or(HandlerError::InvalidField(field)),
    }
}

fn optional_str<'a>(data: &'a Data, field: &str) -> Option<&'a str> {
    data.get(field).and_then(serde_json::Value::as_str)
}

fn optional_f64(data: &Data, field: &'static str) -> Result<Option<f64>, HandlerError> {
    match data.get(field) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or(HandlerError::InvalidField(field)),
    }
}

fn require_identity(ctx: &ActionContext) -> Result<&Identity, HandlerError> {
    ctx.identity.as_ref().ok_or(HandlerError::Unauthorized)
}

/// Broadcast an event to the admin and dispatcher role groups.
async fn notify_operations(ctx: &ActionContext, envelope: &Envelope) {
    ctx.state.fabric.publish(&Group::Role(Role::Admin), envelope).await;
    ctx.state.fabric.publish(&Group::Role(Role::Dispatcher), envelope).await;
}

// =============================================================================
// MESSAGING + ANALYTICS
// =============================================================================

async fn send_message(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let message = require_str(&data, "message")?.to_string();

    let mut out = Data::new();
    out.insert("message".into(), json!(message));
    if let Some(identity) = &ctx.identity {
        out.insert("from_user_id".into(), json!(identity.user_id));
        out.insert("from_name".into(), json!(identity.name));
    }
    Ok(Reply::named("message_received", out))
}

async fn get_analytics(ctx: ActionContext, _data: Data) -> Result<Reply, HandlerError> {
    let analytics = ctx.state.repo.analytics_summary().await?;

    let mut out = Data::new();
    out.insert("analytics".into(), analytics);
    Ok(Reply::named("analytics_received", out))
}

// =============================================================================
// INCIDENTS
// =============================================================================

async fn report_incident(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let incident_type = require_str(&data, "type")?;
    if !SERVICE_TYPES.contains(&incident_type) {
        return Err(HandlerError::InvalidField("type"));
    }
    let severity = require_str(&data, "severity_level")?;
    if !SEVERITY_LEVELS.contains(&severity) {
        return Err(HandlerError::InvalidField("severity_level"));
    }
    let lat = require_f64(&data, "lat")?;
    let lng = require_f64(&data, "lng")?;
    let description = optional_str(&data, "description");

    let incident =
        ctx.state.repo.create_incident(incident_type, lat, lng, severity, description).await?;

    let mut broadcast = Data::new();
    broadcast.insert("incident".into(), serde_json::to_value(&incident).unwrap_or_default());
    notify_operations(&ctx, &Envelope::event("incident_created", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Incident reported successfully"));
    out.insert("incident".into(), serde_json::to_value(&incident).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn list_incidents(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let status = optional_str(&data, "status");
    let incidents = ctx.state.repo.get_all_incidents(status).await?;

    let mut out = Data::new();
    out.insert("count".into(), json!(incidents.len()));
    out.insert("incidents".into(), serde_json::to_value(&incidents).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn resolve_incident(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let incident_id = require_i64(&data, "incident_id")?;
    let incident = ctx
        .state
        .repo
        .resolve_incident(incident_id)
        .await?
        .ok_or_else(|| HandlerError::NotFound(format!("Incident {incident_id} not found")))?;

    let mut broadcast = Data::new();
    broadcast.insert("incident".into(), serde_json::to_value(&incident).unwrap_or_default());
    notify_operations(&ctx, &Envelope::event("incident_resolved", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Incident resolved"));
    out.insert("incident".into(), serde_json::to_value(&incident).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn dispatch_incident(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let identity = require_identity(&ctx)?;
    let incident_id = require_i64(&data, "incident_id")?;
    let vehicle_id = require_i64(&data, "new_vehicle_id")?;

    let incident = ctx
        .state
        .repo
        .reassign_dispatch(incident_id, vehicle_id, identity.user_id)
        .await?
        .ok_or_else(|| HandlerError::NotFound(format!("Incident {incident_id} not found")))?;

    let mut broadcast = Data::new();
    broadcast.insert("incident".into(), serde_json::to_value(&incident).unwrap_or_default());
    broadcast.insert("vehicle_id".into(), json!(vehicle_id));
    notify_operations(&ctx, &Envelope::event("incident_dispatched", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Vehicle dispatched to incident"));
    out.insert("incident".into(), serde_json::to_value(&incident).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn get_incident_dispatches(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let incident_id = data.get("incident_id").and_then(serde_json::Value::as_i64);
    let dispatches = ctx.state.repo.dispatches_for_incident(incident_id).await?;

    let mut out = Data::new();
    out.insert("dispatches".into(), json!(dispatches));
    Ok(Reply::data(out))
}

async fn get_vehicle_for_incident(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let incident_id = require_i64(&data, "incident_id")?;
    let vehicle = ctx.state.repo.get_vehicle_for_incident(incident_id).await?.ok_or_else(|| {
        HandlerError::NotFound(format!("No vehicle dispatched for incident {incident_id}"))
    })?;

    let mut out = Data::new();
    out.insert("vehicle".into(), serde_json::to_value(&vehicle).unwrap_or_default());
    Ok(Reply::data(out))
}

// =============================================================================
// VEHICLES
// =============================================================================

async fn list_vehicles(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let status = optional_str(&data, "status");
    let vehicles = ctx.state.repo.get_all_vehicles(status).await?;

    let mut out = Data::new();
    out.insert("count".into(), json!(vehicles.len()));
    out.insert("vehicles".into(), serde_json::to_value(&vehicles).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn create_vehicle(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let station_id = require_i64(&data, "station_id")?;
    let capacity = i32::try_from(require_i64(&data, "capacity")?)
        .map_err(|_| HandlerError::InvalidField("capacity"))?;
    let lat = require_f64(&data, "lat")?;
    let lng = require_f64(&data, "lng")?;

    let vehicle = ctx.state.repo.create_vehicle(station_id, capacity, lat, lng).await?;

    let mut broadcast = Data::new();
    broadcast.insert("vehicle".into(), serde_json::to_value(&vehicle).unwrap_or_default());
    notify_operations(&ctx, &Envelope::event("vehicle_created", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Vehicle created"));
    out.insert("vehicle".into(), serde_json::to_value(&vehicle).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn delete_vehicle(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let vehicle_id = require_i64(&data, "vehicle_id")?;
    if !ctx.state.repo.delete_vehicle(vehicle_id).await? {
        return Err(HandlerError::NotFound(format!("Vehicle {vehicle_id} not found")));
    }

    // A deleted vehicle cannot keep a stream alive.
    ctx.state.supervisor.stop(vehicle_id).await;

    let mut broadcast = Data::new();
    broadcast.insert("vehicle_id".into(), json!(vehicle_id));
    notify_operations(&ctx, &Envelope::event("vehicle_deleted", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Vehicle deleted"));
    out.insert("vehicle_id".into(), json!(vehicle_id));
    Ok(Reply::data(out))
}

async fn update_unit_location(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let vehicle_id = require_i64(&data, "vehicle_id")?;
    let lat = require_f64(&data, "lat")?;
    let lng = require_f64(&data, "lng")?;

    let vehicle = ctx
        .state
        .repo
        .update_vehicle_location(vehicle_id, lat, lng)
        .await?
        .ok_or_else(|| HandlerError::NotFound(format!("Vehicle {vehicle_id} not found")))?;

    // Keep the hot store current so a later dispatch can start from here.
    ctx.state.store.set_last_location(vehicle_id, LatLng::new(lat, lng)).await?;

    let mut broadcast = Data::new();
    broadcast.insert("vehicle_id".into(), json!(vehicle_id));
    broadcast.insert("lat".into(), json!(lat));
    broadcast.insert("lng".into(), json!(lng));
    notify_operations(&ctx, &Envelope::event("vehicle_location_update", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Location updated successfully"));
    out.insert("vehicle".into(), serde_json::to_value(&vehicle).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn mark_vehicle_on_route(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let vehicle_id = require_i64(&data, "vehicle_id")?;
    let vehicle = ctx
        .state
        .repo
        .mark_vehicle_on_route(vehicle_id)
        .await?
        .ok_or_else(|| HandlerError::NotFound(format!("Vehicle {vehicle_id} not found")))?;

    let mut broadcast = Data::new();
    broadcast.insert("vehicle".into(), serde_json::to_value(&vehicle).unwrap_or_default());
    notify_operations(&ctx, &Envelope::event("vehicle_status_updated", broadcast)).await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Vehicle marked on route"));
    out.insert("vehicle".into(), serde_json::to_value(&vehicle).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn dispatch_vehicle(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let vehicle_id = require_i64(&data, "vehicle_id")?;
    let end = LatLng::new(require_f64(&data, "end_lat")?, require_f64(&data, "end_lng")?);
    let origin = match (optional_f64(&data, "start_lat")?, optional_f64(&data, "start_lng")?) {
        (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
        (None, None) => None,
        // One half of a coordinate pair is no coordinate at all.
        (Some(_), None) => return Err(HandlerError::MissingField("start_lng")),
        (None, Some(_)) => return Err(HandlerError::MissingField("start_lat")),
    };

    if ctx.state.repo.get_vehicle_by_id(vehicle_id).await?.is_none() {
        return Err(HandlerError::NotFound(format!("Vehicle {vehicle_id} not found")));
    }

    ctx.state.supervisor.dispatch(vehicle_id, end, origin).await?;

    let mut out = Data::new();
    out.insert("vehicle_id".into(), json!(vehicle_id));
    Ok(Reply::named("route_started", out))
}

async fn subscribe_vehicle(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let identity = require_identity(&ctx)?;
    let vehicle_id = require_i64(&data, "vehicle_id")?;

    ctx.state.fabric.join(ctx.conn_id, &Group::Vehicle(vehicle_id), ctx.tx.clone()).await;
    ctx.state.store.add_watcher(vehicle_id, identity.user_id).await?;

    let mut out = Data::new();
    out.insert("vehicle_id".into(), json!(vehicle_id));
    let mut reply = Reply::named("vehicle_subscribed", out);

    // Late subscribers get the in-flight route immediately.
    if let Some(route) = ctx.state.store.vehicle_route(vehicle_id).await? {
        let cursor = ctx.state.store.route_cursor(vehicle_id).await?;
        let mut snapshot = Data::new();
        snapshot.insert("vehicle_id".into(), json!(vehicle_id));
        snapshot.insert("route".into(), serde_json::to_value(&route).unwrap_or_default());
        snapshot.insert("route_index".into(), json!(cursor));
        reply = reply.with_extra(Envelope::event("vehicle_route", snapshot));
    }

    Ok(reply)
}

async fn unsubscribe_vehicle(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let identity = require_identity(&ctx)?;
    let vehicle_id = require_i64(&data, "vehicle_id")?;

    ctx.state.fabric.leave(ctx.conn_id, &Group::Vehicle(vehicle_id)).await;
    ctx.state.store.remove_watcher(vehicle_id, identity.user_id).await?;

    let mut out = Data::new();
    out.insert("vehicle_id".into(), json!(vehicle_id));
    Ok(Reply::named("vehicle_unsubscribed", out))
}

// =============================================================================
// STATIONS
// =============================================================================

async fn list_stations(ctx: ActionContext, _data: Data) -> Result<Reply, HandlerError> {
    let stations = ctx.state.repo.get_all_stations().await?;

    let mut out = Data::new();
    out.insert("stations".into(), serde_json::to_value(&stations).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn create_station(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let station_type = require_str(&data, "type")?;
    if !SERVICE_TYPES.contains(&station_type) {
        return Err(HandlerError::InvalidField("type"));
    }
    let zone = require_str(&data, "zone")?;
    let lat = require_f64(&data, "lat")?;
    let lng = require_f64(&data, "lng")?;

    let station = ctx.state.repo.create_station(station_type, zone, lat, lng).await?;

    let mut out = Data::new();
    out.insert("message".into(), json!("Station created"));
    out.insert("station".into(), serde_json::to_value(&station).unwrap_or_default());
    Ok(Reply::data(out))
}

// =============================================================================
// USER ADMINISTRATION
// =============================================================================

async fn list_admins(ctx: ActionContext, _data: Data) -> Result<Reply, HandlerError> {
    let users = ctx.state.repo.get_all_admin_users().await?;

    let mut out = Data::new();
    out.insert("users".into(), serde_json::to_value(&users).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn create_admin(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let email = require_str(&data, "email")?;
    let password = require_str(&data, "password")?;
    let name = require_str(&data, "name")?;
    let role = optional_str(&data, "role").unwrap_or("DISPATCHER");
    if !CREATABLE_ROLES.contains(&role) {
        return Err(HandlerError::InvalidField("role"));
    }

    let user = ctx.state.repo.create_admin_user(email, password, name, role).await?;

    let mut out = Data::new();
    out.insert("message".into(), json!("User created"));
    out.insert("user".into(), serde_json::to_value(&user).unwrap_or_default());
    Ok(Reply::data(out))
}

async fn assign_responder_to_vehicle(ctx: ActionContext, data: Data) -> Result<Reply, HandlerError> {
    let responder_id = require_i64(&data, "responder_id")?;
    let vehicle_id = require_i64(&data, "vehicle_id")?;

    if !ctx.state.repo.assign_responder_to_vehicle(responder_id, vehicle_id).await? {
        return Err(HandlerError::NotFound("Responder or vehicle not found".to_string()));
    }

    let mut broadcast = Data::new();
    broadcast.insert("responder_id".into(), json!(responder_id));
    broadcast.insert("vehicle_id".into(), json!(vehicle_id));
    notify_operations(&ctx, &Envelope::event("vehicle_assignment_updated", broadcast)).await;

    // Tell the responder directly, on every connection they hold.
    let mut assigned = Data::new();
    assigned.insert("vehicle_id".into(), json!(vehicle_id));
    ctx.state
        .fabric
        .publish(&Group::User(responder_id), &Envelope::event("you_are_assigned", assigned))
        .await;

    let mut out = Data::new();
    out.insert("message".into(), json!("Responder assigned to vehicle"));
    Ok(Reply::data(out))
}

#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;
