//! In-process HTTP doubles for the directions provider and the PostgREST
//! order store. Each binds `127.0.0.1:0` and serves from a background task.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use eta_pipeline::directions::{DirectionsError, DirectionsProvider, Route};
use eta_pipeline::models::geo::GeoPoint;
use serde_json::{Value, json};

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Directions double used in-process: fixed answer, counted calls.
pub struct StubDirections {
    answer: Result<Option<Route>, String>,
    calls: AtomicUsize,
    waypoints: Mutex<Vec<Vec<GeoPoint>>>,
}

impl StubDirections {
    pub fn route(duration: f64, distance: f64) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(Some(Route {
                duration,
                distance,
                geometry: json!({
                    "type": "LineString",
                    "coordinates": [[-74.01, 40.71], [-74.0, 40.72], [-73.98, 40.75]]
                }),
            })),
            calls: AtomicUsize::new(0),
            waypoints: Mutex::new(Vec::new()),
        })
    }

    pub fn no_route() -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(None),
            calls: AtomicUsize::new(0),
            waypoints: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            waypoints: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_waypoints(&self) -> Option<Vec<GeoPoint>> {
        self.waypoints.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl DirectionsProvider for StubDirections {
    fn check_config(&self) -> Result<(), DirectionsError> {
        Ok(())
    }

    async fn route(&self, waypoints: &[GeoPoint]) -> Result<Option<Route>, DirectionsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.waypoints.lock().unwrap().push(waypoints.to_vec());
        self.answer.clone().map_err(|message| DirectionsError::Api {
            status: 422,
            message,
        })
    }
}

#[derive(Clone, Debug)]
pub struct RecordedDirectionsRequest {
    pub coordinates: String,
    pub query: HashMap<String, String>,
}

struct MapboxState {
    status: StatusCode,
    body: Value,
    requests: Vec<RecordedDirectionsRequest>,
}

/// Speaks the Mapbox driving directions wire format.
pub struct MockMapbox {
    url: String,
    state: Arc<Mutex<MapboxState>>,
}

impl MockMapbox {
    pub async fn start(status: StatusCode, body: Value) -> Self {
        let state = Arc::new(Mutex::new(MapboxState {
            status,
            body,
            requests: Vec::new(),
        }));

        let app = Router::new()
            .route("/directions/v5/mapbox/driving/:coordinates", get(directions))
            .with_state(state.clone());

        Self {
            url: serve(app).await,
            state,
        }
    }

    pub async fn with_route(duration: f64, distance: f64) -> Self {
        Self::start(
            StatusCode::OK,
            json!({
                "code": "Ok",
                "routes": [{
                    "duration": duration,
                    "distance": distance,
                    "geometry": { "type": "LineString", "coordinates": [[-74.01, 40.71], [-73.98, 40.75]] }
                }]
            }),
        )
        .await
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<RecordedDirectionsRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

async fn directions(
    State(state): State<Arc<Mutex<MapboxState>>>,
    Path(coordinates): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state.requests.push(RecordedDirectionsRequest { coordinates, query });
    (state.status, Json(state.body.clone()))
}

#[derive(Clone, Debug)]
pub struct RecordedStoreRequest {
    pub method: String,
    pub query: HashMap<String, String>,
    pub apikey: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

struct PostgrestState {
    rows: HashMap<String, Value>,
    requests: Vec<RecordedStoreRequest>,
}

/// A PostgREST `orders` table that understands `id=eq.<uuid>` filters.
pub struct MockPostgrest {
    url: String,
    state: Arc<Mutex<PostgrestState>>,
}

impl MockPostgrest {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(PostgrestState {
            rows: HashMap::new(),
            requests: Vec::new(),
        }));

        let app = Router::new()
            .route(
                "/rest/v1/orders",
                get(select_rows).patch(patch_rows).post(insert_rows),
            )
            .with_state(state.clone());

        Self {
            url: serve(app).await,
            state,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn put_row(&self, row: Value) {
        let id = row["id"].as_str().unwrap().to_string();
        self.state.lock().unwrap().rows.insert(id, row);
    }

    pub fn row(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().rows.get(id).cloned()
    }

    pub fn requests(&self) -> Vec<RecordedStoreRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn record(
    state: &mut PostgrestState,
    method: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: Option<Value>,
) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    state.requests.push(RecordedStoreRequest {
        method: method.to_string(),
        query: query.clone(),
        apikey: header("apikey"),
        authorization: header("authorization"),
        body,
    });
}

fn id_filter(query: &HashMap<String, String>) -> Option<String> {
    query
        .get("id")
        .and_then(|filter| filter.strip_prefix("eq."))
        .map(str::to_string)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("apikey").is_some() && headers.get("authorization").is_some()
}

async fn select_rows(
    State(state): State<Arc<Mutex<PostgrestState>>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    record(&mut state, "GET", &headers, &query, None);
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "No API key found in request" })));
    }

    let rows: Vec<Value> = id_filter(&query)
        .and_then(|id| state.rows.get(&id).cloned())
        .into_iter()
        .collect();
    (StatusCode::OK, Json(Value::Array(rows)))
}

async fn patch_rows(
    State(state): State<Arc<Mutex<PostgrestState>>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    record(&mut state, "PATCH", &headers, &query, Some(body.clone()));

    let Some(id) = id_filter(&query) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "message": "missing filter" })));
    };
    let Some(row) = state.rows.get_mut(&id) else {
        return (StatusCode::OK, Json(json!([])));
    };

    if let (Some(row), Some(patch)) = (row.as_object_mut(), body.as_object()) {
        for (key, value) in patch {
            // Postgres numeric columns come back as text.
            let stored = if key == "distance_miles" {
                Value::String(format!("{:.2}", value.as_f64().unwrap_or_default()))
            } else {
                value.clone()
            };
            row.insert(key.clone(), stored);
        }
    }
    (StatusCode::OK, Json(json!([{ "id": id }])))
}

async fn insert_rows(
    State(state): State<Arc<Mutex<PostgrestState>>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    record(&mut state, "POST", &headers, &query, Some(body.clone()));

    let mut inserted = Vec::new();
    for row in body.as_array().cloned().unwrap_or_default() {
        let id = row["id"].as_str().unwrap_or_default().to_string();
        if state.rows.contains_key(&id) {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "message": "duplicate key value violates unique constraint" })),
            );
        }
        let mut stored = row.clone();
        if let Some(object) = stored.as_object_mut() {
            object.insert("eta_minutes".to_string(), Value::Null);
            object.insert("distance_miles".to_string(), Value::Null);
            object.insert("eta_updated_at".to_string(), Value::Null);
        }
        state.rows.insert(id, stored.clone());
        inserted.push(stored);
    }
    (StatusCode::CREATED, Json(Value::Array(inserted)))
}
