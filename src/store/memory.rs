use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::models::order::{EtaUpdate, NewOrder, Order, OrderChange, StoredEta};
use crate::store::feed::ChangeFeed;
use crate::store::{OrderStore, StoreError, WriteOutcome, WritePolicy};

pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    feed: ChangeFeed,
    policy: WritePolicy,
}

impl InMemoryOrderStore {
    pub fn new(feed: ChangeFeed, policy: WritePolicy) -> Self {
        Self {
            orders: DashMap::new(),
            feed,
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Seeds a fully formed record, replacing any previous one.
    pub fn put(&self, order: Order) {
        self.orders.insert(order.id, order);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn check_config(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let order = order.into_order();

        match self.orders.entry(order.id) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(order.id)),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
            }
        }

        self.feed.publish(OrderChange::inserted(&order));
        Ok(order)
    }

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn fetch_eta(&self, id: Uuid) -> Result<Option<StoredEta>, StoreError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().stored_eta()))
    }

    async fn update_eta(&self, id: Uuid, update: EtaUpdate) -> Result<WriteOutcome, StoreError> {
        {
            let mut order = self.orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;

            if !self.policy.admits(order.eta_updated_at, update.eta_updated_at) {
                return Ok(WriteOutcome::Stale);
            }

            order.apply(&update);
        }

        self.feed.publish(OrderChange::eta_updated(id, &update));
        Ok(WriteOutcome::Applied)
    }
}
