use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use tracing::error;
use uuid::Uuid;

use crate::engine::calculator::EtaError;
use crate::error::AppError;
use crate::models::eta::{CalculateEtaRequest, CalculateEtaResponse};
use crate::models::order::StoredEta;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/functions/calculate-eta", post(calculate_eta))
        .route("/orders/:id/eta", get(get_eta))
}

/// Always answers 200; the outcome is in the body.
async fn calculate_eta(State(state): State<Arc<AppState>>, body: Bytes) -> Json<CalculateEtaResponse> {
    let request = serde_json::from_slice::<CalculateEtaRequest>(&body)
        .map_err(|err| format!("request body must be a JSON object: {err}"));

    let calculator = state.calculator.clone();
    let response = match tokio::spawn(async move { calculator.respond(request).await }).await {
        Ok(response) => response,
        Err(err) => {
            let err = EtaError::Unknown(err.to_string());
            let code = err.code();
            state
                .metrics
                .eta_calculations_total
                .with_label_values(&[code.as_str()])
                .inc();
            error!(code = %code, error = %err, "eta calculation aborted");
            CalculateEtaResponse::failure(code, err.to_string())
        }
    };

    Json(response)
}

async fn get_eta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredEta>, AppError> {
    let eta = state
        .store
        .fetch_eta(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(eta))
}
