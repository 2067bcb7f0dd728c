use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::geo::GeoPoint;

/// The slice of an order record the ETA pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lng: Option<f64>,
    #[serde(default)]
    pub eta_minutes: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional_f64")]
    pub distance_miles: Option<f64>,
    #[serde(default)]
    pub eta_updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(id: Uuid, pickup: GeoPoint, dropoff: GeoPoint) -> Self {
        Self {
            id,
            pickup_lat: Some(pickup.lat),
            pickup_lng: Some(pickup.lng),
            dropoff_lat: Some(dropoff.lat),
            dropoff_lng: Some(dropoff.lng),
            eta_minutes: None,
            distance_miles: None,
            eta_updated_at: None,
        }
    }

    /// Pickup and dropoff, or `None` when any of the four coordinates is missing.
    pub fn route_points(&self) -> Option<(GeoPoint, GeoPoint)> {
        let pickup = GeoPoint::from_parts(self.pickup_lat, self.pickup_lng)?;
        let dropoff = GeoPoint::from_parts(self.dropoff_lat, self.dropoff_lng)?;
        Some((pickup, dropoff))
    }

    pub fn stored_eta(&self) -> StoredEta {
        StoredEta {
            eta_minutes: self.eta_minutes,
            eta_updated_at: self.eta_updated_at,
        }
    }

    pub fn apply(&mut self, update: &EtaUpdate) {
        self.eta_minutes = Some(update.eta_minutes);
        self.distance_miles = Some(update.distance_miles);
        self.eta_updated_at = Some(update.eta_updated_at);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub id: Option<Uuid>,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lng: Option<f64>,
}

impl NewOrder {
    pub fn into_order(self) -> Order {
        Order {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            pickup_lat: self.pickup_lat,
            pickup_lng: self.pickup_lng,
            dropoff_lat: self.dropoff_lat,
            dropoff_lng: self.dropoff_lng,
            eta_minutes: None,
            distance_miles: None,
            eta_updated_at: None,
        }
    }
}

/// What the fallback read path returns. Distance is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEta {
    pub eta_minutes: Option<i64>,
    pub eta_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaUpdate {
    pub eta_minutes: i64,
    pub distance_miles: f64,
    pub eta_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    EtaUpdated,
}

/// Change notification emitted by the order store on every applied write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderChange {
    pub order_id: Uuid,
    pub kind: ChangeKind,
    pub eta_minutes: Option<i64>,
    pub distance_miles: Option<f64>,
    pub eta_updated_at: Option<DateTime<Utc>>,
}

impl OrderChange {
    pub fn inserted(order: &Order) -> Self {
        Self {
            order_id: order.id,
            kind: ChangeKind::Inserted,
            eta_minutes: order.eta_minutes,
            distance_miles: order.distance_miles,
            eta_updated_at: order.eta_updated_at,
        }
    }

    pub fn eta_updated(order_id: Uuid, update: &EtaUpdate) -> Self {
        Self {
            order_id,
            kind: ChangeKind::EtaUpdated,
            eta_minutes: Some(update.eta_minutes),
            distance_miles: Some(update.distance_miles),
            eta_updated_at: Some(update.eta_updated_at),
        }
    }
}

pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    /// Postgres `numeric` columns travel as JSON strings through the REST layer.
    pub fn optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<NumberOrText>::deserialize(deserializer)? {
            None => Ok(None),
            Some(NumberOrText::Number(value)) => Ok(Some(value)),
            Some(NumberOrText::Text(raw)) => raw
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
