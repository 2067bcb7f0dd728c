use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::directions::{DirectionsError, DirectionsProvider};
use crate::models::eta::{CalculateEtaRequest, CalculateEtaResponse, ErrorCode, EtaComputed};
use crate::models::geo::GeoPoint;
use crate::models::order::EtaUpdate;
use crate::observability::metrics::Metrics;
use crate::store::{OrderStore, StoreError, WriteOutcome};

const METERS_TO_MILES: f64 = 0.000621371;

#[derive(Debug, Error)]
pub enum EtaError {
    #[error("server configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("failed to fetch order: {0}")]
    OrderFetch(String),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order is missing pickup or dropoff coordinates")]
    MissingCoordinates,

    #[error("directions provider error: {0}")]
    Directions(String),

    #[error("no route found between courier, pickup and dropoff")]
    NoRoute,

    #[error("failed to save eta: {0}")]
    Update(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl EtaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EtaError::Config(_) => ErrorCode::ConfigError,
            EtaError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            EtaError::OrderFetch(_) => ErrorCode::OrderFetchError,
            EtaError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            EtaError::MissingCoordinates => ErrorCode::MissingCoordinates,
            EtaError::Directions(_) => ErrorCode::MapboxApiError,
            EtaError::NoRoute => ErrorCode::NoRouteFound,
            EtaError::Update(_) => ErrorCode::UpdateError,
            EtaError::Unknown(_) => ErrorCode::UnknownError,
        }
    }

    /// Client and data problems are warnings; everything else needs an operator.
    fn is_operator_visible(&self) -> bool {
        !matches!(
            self,
            EtaError::InvalidRequest(_)
                | EtaError::OrderNotFound(_)
                | EtaError::MissingCoordinates
                | EtaError::NoRoute
        )
    }
}

impl From<DirectionsError> for EtaError {
    fn from(err: DirectionsError) -> Self {
        match err {
            DirectionsError::NotConfigured(msg) => EtaError::Config(msg),
            other => EtaError::Directions(other.to_string()),
        }
    }
}

/// Whole minutes, rounded up.
pub fn eta_minutes(duration_seconds: f64) -> i64 {
    (duration_seconds / 60.0).ceil() as i64
}

/// Miles at two decimals, formatted then parsed back so the stored value is
/// exactly what a two-decimal rendering shows.
pub fn distance_miles(distance_meters: f64) -> f64 {
    let miles = distance_meters * METERS_TO_MILES;
    format!("{miles:.2}").parse().unwrap_or(miles)
}

/// Computes a fresh ETA for one order and persists it on the order record.
pub struct EtaCalculator {
    store: Arc<dyn OrderStore>,
    directions: Arc<dyn DirectionsProvider>,
    metrics: Metrics,
}

impl EtaCalculator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        directions: Arc<dyn DirectionsProvider>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            directions,
            metrics,
        }
    }

    pub fn check_config(&self) -> Result<(), EtaError> {
        self.store
            .check_config()
            .map_err(|err| EtaError::Config(err.to_string()))?;
        self.directions.check_config()?;
        Ok(())
    }

    /// Validates, routes courier -> pickup -> dropoff, and saves the result.
    ///
    /// `request` is `Err` when the body could not be decoded; that is still
    /// reported after the configuration check.
    pub async fn calculate(
        &self,
        request: Result<CalculateEtaRequest, String>,
    ) -> Result<EtaComputed, EtaError> {
        self.check_config()?;

        let request = request.map_err(EtaError::InvalidRequest)?;

        let order_id = match request.order_id.as_deref().map(str::trim) {
            None | Some("") => return Err(EtaError::InvalidRequest("orderId is required".to_string())),
            Some(raw) => Uuid::parse_str(raw)
                .map_err(|_| EtaError::InvalidRequest(format!("orderId {raw} is not a valid id")))?,
        };

        let courier = GeoPoint::from_parts(request.courier_lat, request.courier_lng).ok_or_else(|| {
            EtaError::InvalidRequest("courierLat and courierLng are required".to_string())
        })?;

        let order = self
            .store
            .fetch_order(order_id)
            .await
            .map_err(|err| EtaError::OrderFetch(err.to_string()))?
            .ok_or(EtaError::OrderNotFound(order_id))?;

        let (pickup, dropoff) = order.route_points().ok_or(EtaError::MissingCoordinates)?;

        let route = self
            .directions
            .route(&[courier, pickup, dropoff])
            .await?
            .ok_or(EtaError::NoRoute)?;

        let update = EtaUpdate {
            eta_minutes: eta_minutes(route.duration),
            distance_miles: distance_miles(route.distance),
            eta_updated_at: Utc::now(),
        };

        let outcome = self
            .store
            .update_eta(order_id, update.clone())
            .await
            .map_err(|err| match err {
                StoreError::NotConfigured(msg) => EtaError::Config(msg),
                other => EtaError::Update(other.to_string()),
            })?;

        self.metrics
            .eta_writes_total
            .with_label_values(&[outcome.as_str()])
            .inc();

        let (eta_minutes, distance_miles) = match outcome {
            WriteOutcome::Applied => (update.eta_minutes, update.distance_miles),
            WriteOutcome::Stale => self.stored_values(order_id, &update).await?,
        };

        info!(
            order_id = %order_id,
            eta_minutes,
            distance_miles,
            write = outcome.as_str(),
            "eta calculated"
        );

        Ok(EtaComputed {
            eta_minutes,
            distance_miles,
            route: route.geometry,
        })
    }

    /// The record kept a fresher value than this calculation; report that one.
    async fn stored_values(&self, order_id: Uuid, update: &EtaUpdate) -> Result<(i64, f64), EtaError> {
        let order = self
            .store
            .fetch_order(order_id)
            .await
            .map_err(|err| EtaError::OrderFetch(err.to_string()))?
            .ok_or(EtaError::OrderNotFound(order_id))?;

        Ok(match order.eta_minutes {
            Some(eta_minutes) => (eta_minutes, order.distance_miles.unwrap_or(0.0)),
            None => (update.eta_minutes, update.distance_miles),
        })
    }

    /// `calculate` folded into the wire response, with metrics and logging.
    /// Never fails; every error becomes a `success: false` body.
    pub async fn respond(&self, request: Result<CalculateEtaRequest, String>) -> CalculateEtaResponse {
        let order_id = request
            .as_ref()
            .ok()
            .and_then(|req| req.order_id.clone())
            .unwrap_or_default();

        let start = Instant::now();
        let result = self.calculate(request).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(computed) => {
                self.metrics
                    .eta_calculation_latency_seconds
                    .with_label_values(&["success"])
                    .observe(elapsed);
                self.metrics
                    .eta_calculations_total
                    .with_label_values(&["OK"])
                    .inc();
                CalculateEtaResponse::success(computed)
            }
            Err(err) => {
                let code = err.code();
                self.metrics
                    .eta_calculation_latency_seconds
                    .with_label_values(&["error"])
                    .observe(elapsed);
                self.metrics
                    .eta_calculations_total
                    .with_label_values(&[code.as_str()])
                    .inc();

                if err.is_operator_visible() {
                    error!(order_id = %order_id, code = %code, error = %err, "eta calculation failed");
                } else {
                    warn!(order_id = %order_id, code = %code, error = %err, "eta calculation rejected");
                }

                CalculateEtaResponse::failure(code, err.to_string())
            }
        }
    }
}
