//! Road route lookup via an OSRM-compatible HTTP service.
//!
//! DESIGN
//! ======
//! One trait, one production implementation. The trait exists so the route
//! streamer can be driven with canned routes in tests instead of a live
//! routing server. OSRM speaks GeoJSON, which orders coordinates
//! `[lng, lat]` — the flip happens here and nowhere else.

use async_trait::async_trait;
use tracing::debug;

use crate::protocol::LatLng;

/// Public OSRM demo server. Production deployments point `OSRM_BASE_URL` at
/// their own instance.
pub const DEFAULT_OSRM_BASE_URL: &str = "https://router.project-osrm.org";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("route request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed route response")]
    MalformedResponse,
}

/// Turns an origin/destination pair into an ordered list of waypoints.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn fetch_route(&self, start: LatLng, end: LatLng) -> Result<Vec<LatLng>, ProviderError>;
}

pub struct OsrmRouteProvider {
    http: reqwest::Client,
    base_url: String,
}

impl OsrmRouteProvider {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn fetch_route(&self, start: LatLng, end: LatLng) -> Result<Vec<LatLng>, ProviderError> {
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url, start.lng, start.lat, end.lng, end.lat
        );
        debug!(%url, "fetching route");

        let body: serde_json::Value = self.http.get(&url).send().await?.error_for_status()?.json().await?;
        parse_route(&body)
    }
}

/// Extract the waypoint sequence from an OSRM response body, flipping each
/// GeoJSON `[lng, lat]` pair into a `LatLng`.
fn parse_route(body: &serde_json::Value) -> Result<Vec<LatLng>, ProviderError> {
    let coordinates = body
        .get("routes")
        .and_then(|routes| routes.get(0))
        .and_then(|route| route.get("geometry"))
        .and_then(|geometry| geometry.get("coordinates"))
        .and_then(serde_json::Value::as_array)
        .ok_or(ProviderError::MalformedResponse)?;

    coordinates
        .iter()
        .map(|pair| {
            let lng = pair.get(0).and_then(serde_json::Value::as_f64);
            let lat = pair.get(1).and_then(serde_json::Value::as_f64);
            match (lat, lng) {
                (Some(lat), Some(lng)) => Ok(LatLng::new(lat, lng)),
                _ => Err(ProviderError::MalformedResponse),
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "routing_test.rs"]
mod tests;
