use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

use crate::directions::{DirectionsError, DirectionsProvider, Route};
use crate::models::geo::GeoPoint;

pub const DEFAULT_BASE_URL: &str = "https://api.mapbox.com";

#[derive(Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Deserialize)]
struct MapboxErrorPayload {
    message: String,
}

pub struct MapboxDirections {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl MapboxDirections {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DirectionsError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DirectionsError::Request(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.filter(|token| !token.trim().is_empty()),
        })
    }

    fn token(&self) -> Result<&str, DirectionsError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| DirectionsError::NotConfigured("MAPBOX_ACCESS_TOKEN is not set".to_string()))
    }
}

/// `lng,lat;lng,lat;...`, the path segment the driving profile expects.
pub fn coordinate_path(waypoints: &[GeoPoint]) -> String {
    waypoints
        .iter()
        .map(|point| format!("{},{}", point.lng, point.lat))
        .collect::<Vec<_>>()
        .join(";")
}

#[async_trait]
impl DirectionsProvider for MapboxDirections {
    fn check_config(&self) -> Result<(), DirectionsError> {
        self.token().map(|_| ())
    }

    async fn route(&self, waypoints: &[GeoPoint]) -> Result<Option<Route>, DirectionsError> {
        let token = self.token()?;
        let url = format!(
            "{}/directions/v5/mapbox/driving/{}",
            self.base_url,
            coordinate_path(waypoints)
        );
        debug!(waypoints = waypoints.len(), "requesting driving directions");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("geometries", "geojson"),
                ("overview", "full"),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(|err| {
                error!(url = %url, error = %err, "directions request failed");
                DirectionsError::Request(err.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| DirectionsError::Request(err.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<MapboxErrorPayload>(&text)
                .map(|payload| payload.message)
                .unwrap_or(text);
            return Err(DirectionsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: DirectionsResponse = serde_json::from_str(&text).map_err(|err| {
            error!(error = %err, body = %text, "failed to parse directions response");
            DirectionsError::Malformed(err.to_string())
        })?;

        Ok(parsed.routes.into_iter().next())
    }
}
