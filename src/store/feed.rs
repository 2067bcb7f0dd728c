use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;
use uuid::Uuid;

use crate::models::order::OrderChange;

/// Fan-out of order record changes. Cloning shares the same channel.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<OrderChange>,
}

impl ChangeFeed {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    pub fn publish(&self, change: OrderChange) {
        // No subscribers is the common case between tracking sessions.
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self, order_id: Uuid) -> OrderSubscription {
        OrderSubscription {
            order_id,
            stream: BroadcastStream::new(self.tx.subscribe()),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Changes for a single order. Dropping it releases the underlying receiver.
pub struct OrderSubscription {
    order_id: Uuid,
    stream: BroadcastStream<OrderChange>,
}

impl OrderSubscription {
    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    /// Next change for this order, or `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<OrderChange> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(change) if change.order_id == self.order_id => return Some(change),
                Ok(_) => continue,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(order_id = %self.order_id, skipped, "order change subscription lagged");
                }
            }
        }
        None
    }
}
