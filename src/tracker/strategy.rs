//! Ordered ETA sources for the tracker.
//!
//! Each strategy either produces an answer (`Ok`, possibly "no ETA yet") or
//! explains why it could not. `first_success` walks the list in order and
//! stops at the first answer, so the fallback policy is the order of the list.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::eta::{CalculateEtaRequest, EtaSnapshot};
use crate::models::geo::GeoPoint;
use crate::tracker::client::{CalculatorClient, EtaReader};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    #[error("skipped: {0}")]
    Skipped(&'static str),

    #[error("failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait EtaStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(
        &self,
        order_id: Uuid,
        courier: Option<GeoPoint>,
    ) -> Result<Option<EtaSnapshot>, StrategyError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub strategy: &'static str,
    pub snapshot: Option<EtaSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub strategy: &'static str,
    pub error: StrategyError,
}

pub async fn first_success(
    strategies: &[Arc<dyn EtaStrategy>],
    order_id: Uuid,
    courier: Option<GeoPoint>,
) -> Result<Resolution, Vec<Attempt>> {
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        match strategy.attempt(order_id, courier).await {
            Ok(snapshot) => {
                return Ok(Resolution {
                    strategy: strategy.name(),
                    snapshot,
                });
            }
            Err(error) => attempts.push(Attempt {
                strategy: strategy.name(),
                error,
            }),
        }
    }

    Err(attempts)
}

/// Fresh calculation through the calculator. Needs a courier position.
pub struct RemoteCalculation {
    client: Arc<dyn CalculatorClient>,
}

impl RemoteCalculation {
    pub fn new(client: Arc<dyn CalculatorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EtaStrategy for RemoteCalculation {
    fn name(&self) -> &'static str {
        "remote_calculation"
    }

    async fn attempt(
        &self,
        order_id: Uuid,
        courier: Option<GeoPoint>,
    ) -> Result<Option<EtaSnapshot>, StrategyError> {
        let courier = courier.ok_or(StrategyError::Skipped("courier position required"))?;

        let response = self
            .client
            .calculate(&CalculateEtaRequest::new(order_id.to_string(), courier))
            .await
            .map_err(|err| StrategyError::Failed(err.to_string()))?;

        let computed = response.into_computed().map_err(StrategyError::Failed)?;

        Ok(Some(EtaSnapshot {
            eta_minutes: computed.eta_minutes,
            distance_miles: computed.distance_miles,
            last_updated: Utc::now(),
            route: Some(computed.route),
        }))
    }
}

/// Last value saved on the order record. Distance is not recoverable here
/// and is reported as zero.
pub struct StoredEtaRead {
    reader: Arc<dyn EtaReader>,
}

impl StoredEtaRead {
    pub fn new(reader: Arc<dyn EtaReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl EtaStrategy for StoredEtaRead {
    fn name(&self) -> &'static str {
        "stored_eta"
    }

    async fn attempt(
        &self,
        order_id: Uuid,
        _courier: Option<GeoPoint>,
    ) -> Result<Option<EtaSnapshot>, StrategyError> {
        let stored = self
            .reader
            .read_eta(order_id)
            .await
            .map_err(|err| StrategyError::Failed(err.to_string()))?
            .ok_or_else(|| StrategyError::Failed(format!("order {order_id} not found")))?;

        Ok(stored.eta_minutes.map(|eta_minutes| EtaSnapshot {
            eta_minutes,
            distance_miles: 0.0,
            last_updated: stored.eta_updated_at.unwrap_or_else(Utc::now),
            route: None,
        }))
    }
}
