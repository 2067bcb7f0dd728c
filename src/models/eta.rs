use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::geo::GeoPoint;
use crate::models::order::lenient;

/// Body of a calculator invocation. Every field is optional on the wire so a
/// missing one is reported as a validation failure instead of a decode error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateEtaRequest {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub courier_lat: Option<f64>,
    #[serde(default)]
    pub courier_lng: Option<f64>,
}

impl CalculateEtaRequest {
    pub fn new(order_id: impl Into<String>, courier: GeoPoint) -> Self {
        Self {
            order_id: Some(order_id.into()),
            courier_lat: Some(courier.lat),
            courier_lng: Some(courier.lng),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigError,
    InvalidRequest,
    OrderFetchError,
    OrderNotFound,
    MissingCoordinates,
    MapboxApiError,
    NoRouteFound,
    UpdateError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::OrderFetchError => "ORDER_FETCH_ERROR",
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::MissingCoordinates => "MISSING_COORDINATES",
            ErrorCode::MapboxApiError => "MAPBOX_API_ERROR",
            ErrorCode::NoRouteFound => "NO_ROUTE_FOUND",
            ErrorCode::UpdateError => "UPDATE_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful calculation, before it is put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaComputed {
    pub eta_minutes: i64,
    pub distance_miles: f64,
    pub route: Value,
}

/// Wire shape of the calculator's answer. `success` decides which of the
/// remaining fields are meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculateEtaResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::optional_f64"
    )]
    pub distance_miles: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CalculateEtaResponse {
    pub fn success(computed: EtaComputed) -> Self {
        Self {
            success: true,
            eta_minutes: Some(computed.eta_minutes),
            distance_miles: Some(computed.distance_miles),
            route: Some(computed.route),
            error: None,
            code: None,
        }
    }

    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            eta_minutes: None,
            distance_miles: None,
            route: None,
            error: Some(error.into()),
            code: Some(code.as_str().to_string()),
        }
    }

    /// A response only counts as a result when the flag is set and the ETA is there.
    pub fn into_computed(self) -> Result<EtaComputed, String> {
        match (self.success, self.eta_minutes) {
            (true, Some(eta_minutes)) => Ok(EtaComputed {
                eta_minutes,
                distance_miles: self.distance_miles.unwrap_or(0.0),
                route: self.route.unwrap_or(Value::Null),
            }),
            (true, None) => Err("calculator reported success without eta_minutes".to_string()),
            (false, _) => Err(format!(
                "{} ({})",
                self.error.as_deref().unwrap_or("calculator reported failure"),
                self.code.as_deref().unwrap_or("NO_CODE"),
            )),
        }
    }
}

/// Client-held, last known ETA for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaSnapshot {
    pub eta_minutes: i64,
    pub distance_miles: f64,
    pub last_updated: DateTime<Utc>,
    pub route: Option<Value>,
}
