pub mod mapbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::geo::GeoPoint;

pub use mapbox::MapboxDirections;

#[derive(Debug, Error)]
pub enum DirectionsError {
    #[error("directions provider not configured: {0}")]
    NotConfigured(String),

    #[error("directions request failed: {0}")]
    Request(String),

    #[error("directions provider error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed directions response: {0}")]
    Malformed(String),
}

/// Best route for a waypoint path as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Seconds.
    pub duration: f64,
    /// Meters.
    pub distance: f64,
    pub geometry: Value,
}

#[async_trait]
pub trait DirectionsProvider: Send + Sync + 'static {
    fn check_config(&self) -> Result<(), DirectionsError>;

    /// Driving route through `waypoints` in order. `Ok(None)` means the
    /// provider answered but found no route.
    async fn route(&self, waypoints: &[GeoPoint]) -> Result<Option<Route>, DirectionsError>;
}
