use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::directions::{DirectionsProvider, MapboxDirections};
use crate::engine::calculator::EtaCalculator;
use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::store::{ChangeFeed, InMemoryOrderStore, OrderStore, RestOrderStore, WritePolicy};

pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub calculator: Arc<EtaCalculator>,
    pub feed: ChangeFeed,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        directions: Arc<dyn DirectionsProvider>,
        feed: ChangeFeed,
    ) -> Self {
        let metrics = Metrics::new();
        let calculator = Arc::new(EtaCalculator::new(
            store.clone(),
            directions,
            metrics.clone(),
        ));

        Self {
            store,
            calculator,
            feed,
            metrics,
        }
    }

    /// In-memory store wired to the given directions provider.
    pub fn in_memory(
        directions: Arc<dyn DirectionsProvider>,
        event_buffer_size: usize,
        policy: WritePolicy,
    ) -> (Self, Arc<InMemoryOrderStore>) {
        let feed = ChangeFeed::new(event_buffer_size);
        let store = Arc::new(InMemoryOrderStore::new(feed.clone(), policy));
        (Self::new(store.clone(), directions, feed), store)
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let feed = ChangeFeed::new(config.event_buffer_size);

        let store: Arc<dyn OrderStore> = match config.store_backend {
            StoreBackend::Memory => {
                Arc::new(InMemoryOrderStore::new(feed.clone(), config.write_policy))
            }
            StoreBackend::Rest => Arc::new(
                RestOrderStore::new(
                    config.supabase_url.clone(),
                    config.supabase_service_key.clone(),
                    feed.clone(),
                    config.write_policy,
                    config.directions_timeout,
                )
                .map_err(|err| AppError::Internal(err.to_string()))?,
            ),
        };

        let directions = Arc::new(
            MapboxDirections::new(
                config.mapbox_base_url.clone(),
                config.mapbox_token.clone(),
                config.directions_timeout,
            )
            .map_err(|err| AppError::Internal(err.to_string()))?,
        );

        Ok(Self::new(store, directions, feed))
    }
}
