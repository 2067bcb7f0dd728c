use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::calculator::EtaCalculator;
use crate::models::eta::{CalculateEtaRequest, CalculateEtaResponse};
use crate::models::order::StoredEta;
use crate::store::OrderStore;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Something that can run a calculator invocation.
#[async_trait]
pub trait CalculatorClient: Send + Sync {
    async fn calculate(&self, request: &CalculateEtaRequest) -> Result<CalculateEtaResponse, ClientError>;
}

/// Point read of an order's stored ETA. `Ok(None)` means the order is unknown.
#[async_trait]
pub trait EtaReader: Send + Sync {
    async fn read_eta(&self, order_id: Uuid) -> Result<Option<StoredEta>, ClientError>;
}

#[async_trait]
impl CalculatorClient for EtaCalculator {
    async fn calculate(&self, request: &CalculateEtaRequest) -> Result<CalculateEtaResponse, ClientError> {
        Ok(self.respond(Ok(request.clone())).await)
    }
}

/// Reads straight from an order store, for callers living next to it.
pub struct StoreReader(pub Arc<dyn OrderStore>);

#[async_trait]
impl EtaReader for StoreReader {
    async fn read_eta(&self, order_id: Uuid) -> Result<Option<StoredEta>, ClientError> {
        self.0
            .fetch_eta(order_id)
            .await
            .map_err(|err| ClientError::Store(err.to_string()))
    }
}

fn http_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ClientError::Transport(format!("failed to build http client: {err}")))
}

/// Calls `POST {base}/functions/calculate-eta`.
pub struct HttpCalculatorClient {
    client: Client,
    base_url: String,
}

impl HttpCalculatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CalculatorClient for HttpCalculatorClient {
    async fn calculate(&self, request: &CalculateEtaRequest) -> Result<CalculateEtaResponse, ClientError> {
        let response = self
            .client
            .post(format!("{}/functions/calculate-eta", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }

        response
            .json::<CalculateEtaResponse>()
            .await
            .map_err(|err| ClientError::Malformed(err.to_string()))
    }
}

/// Calls `GET {base}/orders/{id}/eta`.
pub struct HttpEtaReader {
    client: Client,
    base_url: String,
}

impl HttpEtaReader {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EtaReader for HttpEtaReader {
    async fn read_eta(&self, order_id: Uuid) -> Result<Option<StoredEta>, ClientError> {
        let response = self
            .client
            .get(format!("{}/orders/{order_id}/eta", self.base_url))
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<StoredEta>()
                .await
                .map(Some)
                .map_err(|err| ClientError::Malformed(err.to_string())),
            status => Err(ClientError::Status(status.as_u16())),
        }
    }
}
