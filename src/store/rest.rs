use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::models::order::{EtaUpdate, NewOrder, Order, OrderChange, StoredEta};
use crate::store::feed::ChangeFeed;
use crate::store::{OrderStore, StoreError, WriteOutcome, WritePolicy};

const ORDER_COLUMNS: &str =
    "id,pickup_lat,pickup_lng,dropoff_lat,dropoff_lng,eta_minutes,distance_miles,eta_updated_at";
const ETA_COLUMNS: &str = "eta_minutes,eta_updated_at";

#[derive(Deserialize)]
struct PostgrestError {
    message: String,
}

/// Order store backed by a PostgREST endpoint (`{url}/rest/v1/orders`).
///
/// Change notifications are published for writes made through this store
/// only; writes by other processes are not observed.
pub struct RestOrderStore {
    client: Client,
    base_url: Option<String>,
    service_key: Option<String>,
    feed: ChangeFeed,
    policy: WritePolicy,
}

impl RestOrderStore {
    pub fn new(
        base_url: Option<String>,
        service_key: Option<String>,
        feed: ChangeFeed,
        policy: WritePolicy,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StoreError::Request(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.filter(|url| !url.trim().is_empty()),
            service_key: service_key.filter(|key| !key.trim().is_empty()),
            feed,
            policy,
        })
    }

    fn request(&self, method: Method) -> Result<RequestBuilder, StoreError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| StoreError::NotConfigured("SUPABASE_URL is not set".to_string()))?;
        let key = self.service_key.as_deref().ok_or_else(|| {
            StoreError::NotConfigured("SUPABASE_SERVICE_ROLE_KEY is not set".to_string())
        })?;

        let url = format!("{}/rest/v1/orders", base_url.trim_end_matches('/'));
        Ok(self
            .client
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(key))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<PostgrestError>(&text)
                .map(|payload| payload.message)
                .unwrap_or(text);
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|err| StoreError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl OrderStore for RestOrderStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn check_config(&self) -> Result<(), StoreError> {
        self.request(Method::GET).map(|_| ())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let order = order.into_order();
        let builder = self
            .request(Method::POST)?
            .header("Prefer", "return=representation")
            .query(&[("select", ORDER_COLUMNS)])
            .json(&json!([{
                "id": order.id,
                "pickup_lat": order.pickup_lat,
                "pickup_lng": order.pickup_lng,
                "dropoff_lat": order.dropoff_lat,
                "dropoff_lng": order.dropoff_lng,
            }]));

        let rows = match self.send::<Vec<Order>>(builder).await {
            Err(StoreError::Rejected { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                return Err(StoreError::AlreadyExists(order.id));
            }
            other => other?,
        };

        let inserted = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Malformed("insert returned no rows".to_string()))?;

        self.feed.publish(OrderChange::inserted(&inserted));
        Ok(inserted)
    }

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let builder = self
            .request(Method::GET)?
            .query(&[("id", format!("eq.{id}")), ("select", ORDER_COLUMNS.to_string())]);

        let rows: Vec<Order> = self.send(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_eta(&self, id: Uuid) -> Result<Option<StoredEta>, StoreError> {
        let builder = self
            .request(Method::GET)?
            .query(&[("id", format!("eq.{id}")), ("select", ETA_COLUMNS.to_string())]);

        let rows: Vec<StoredEta> = self.send(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_eta(&self, id: Uuid, update: EtaUpdate) -> Result<WriteOutcome, StoreError> {
        let mut query = vec![("id", format!("eq.{id}")), ("select", "id".to_string())];
        if self.policy == WritePolicy::Monotonic {
            let stamp = update
                .eta_updated_at
                .to_rfc3339_opts(SecondsFormat::Micros, true);
            query.push((
                "or",
                format!("(eta_updated_at.is.null,eta_updated_at.lt.{stamp})"),
            ));
        }

        let builder = self
            .request(Method::PATCH)?
            .header("Prefer", "return=representation")
            .query(&query)
            .json(&update);

        let rows: Vec<serde_json::Value> = self.send(builder).await?;
        if rows.is_empty() {
            // Zero rows means either no such order or a filtered-out stale write.
            return match (self.policy, self.fetch_eta(id).await?) {
                (WritePolicy::Monotonic, Some(_)) => {
                    debug!(order_id = %id, "stale eta write dropped by store");
                    Ok(WriteOutcome::Stale)
                }
                _ => Err(StoreError::NotFound(id)),
            };
        }

        self.feed.publish(OrderChange::eta_updated(id, &update));
        Ok(WriteOutcome::Applied)
    }
}
