pub mod feed;
pub mod memory;
pub mod rest;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::{EtaUpdate, NewOrder, Order, StoredEta};

pub use feed::{ChangeFeed, OrderSubscription};
pub use memory::InMemoryOrderStore;
pub use rest::RestOrderStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order store not configured: {0}")]
    NotConfigured(String),

    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("order {0} already exists")]
    AlreadyExists(Uuid),

    #[error("order store request failed: {0}")]
    Request(String),

    #[error("order store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("order store returned malformed data: {0}")]
    Malformed(String),
}

/// How concurrent ETA writes for one order are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Last write wins, whatever its timestamp.
    #[default]
    Overwrite,
    /// A write older than (or as old as) the stored `eta_updated_at` is dropped.
    Monotonic,
}

impl WritePolicy {
    pub fn admits(&self, stored: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> bool {
        match (self, stored) {
            (WritePolicy::Overwrite, _) => true,
            (WritePolicy::Monotonic, None) => true,
            (WritePolicy::Monotonic, Some(stored)) => incoming > stored,
        }
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(WritePolicy::Overwrite),
            "monotonic" => Ok(WritePolicy::Monotonic),
            other => Err(format!("unknown write policy {other}, expected overwrite/monotonic")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Stale,
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Applied => "applied",
            WriteOutcome::Stale => "stale",
        }
    }
}

/// Durable home of an order's last known ETA.
///
/// Implementations publish an `OrderChange` on their `ChangeFeed` for every
/// write they apply; dropped stale writes publish nothing.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn check_config(&self) -> Result<(), StoreError>;

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn fetch_eta(&self, id: Uuid) -> Result<Option<StoredEta>, StoreError>;

    async fn update_eta(&self, id: Uuid, update: EtaUpdate) -> Result<WriteOutcome, StoreError>;
}
