//! Where the tracker gets pushed order changes from.
//!
//! In-process trackers read the shared `ChangeFeed` directly; remote ones
//! connect to `GET /orders/{id}/eta/ws`. A stream that ends leaves the
//! tracker polling only.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::order::OrderChange;
use crate::store::feed::{ChangeFeed, OrderSubscription};

#[async_trait]
pub trait ChangeStream: Send {
    /// Next change for the subscribed order, `None` once the stream is gone.
    async fn next_change(&mut self) -> Option<OrderChange>;
}

pub trait ChangeSource: Send + Sync + 'static {
    /// Called synchronously from `EtaTracker::mount`.
    fn open(&self, order_id: Uuid) -> Box<dyn ChangeStream>;
}

impl ChangeSource for ChangeFeed {
    fn open(&self, order_id: Uuid) -> Box<dyn ChangeStream> {
        Box::new(self.subscribe(order_id))
    }
}

#[async_trait]
impl ChangeStream for OrderSubscription {
    async fn next_change(&mut self) -> Option<OrderChange> {
        self.recv().await
    }
}

/// Push changes from the HTTP surface's websocket endpoint. Only `ws://`
/// is supported; an `https` base maps to `wss://` and fails to connect.
pub struct WebSocketChanges {
    base_url: String,
}

impl WebSocketChanges {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = match base_url.split_once("://") {
            Some(("https", rest)) => format!("wss://{rest}"),
            Some(("http", rest)) => format!("ws://{rest}"),
            _ => base_url,
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, order_id: Uuid) -> String {
        format!("{}/orders/{order_id}/eta/ws", self.base_url)
    }
}

impl ChangeSource for WebSocketChanges {
    fn open(&self, order_id: Uuid) -> Box<dyn ChangeStream> {
        Box::new(OrderSocket {
            url: self.url(order_id),
            order_id,
            socket: None,
        })
    }
}

/// Connects on first use, so opening never blocks.
struct OrderSocket {
    url: String,
    order_id: Uuid,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl ChangeStream for OrderSocket {
    async fn next_change(&mut self) -> Option<OrderChange> {
        if self.socket.is_none() {
            match connect_async(self.url.as_str()).await {
                Ok((socket, _response)) => {
                    debug!(order_id = %self.order_id, url = %self.url, "eta push connected");
                    self.socket = Some(socket);
                }
                Err(err) => {
                    warn!(order_id = %self.order_id, url = %self.url, error = %err, "eta push connect failed");
                    return None;
                }
            }
        }

        let socket = self.socket.as_mut()?;
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<OrderChange>(&text) {
                    Ok(change) if change.order_id == self.order_id => return Some(change),
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(order_id = %self.order_id, error = %err, "undecodable eta push frame");
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    warn!(order_id = %self.order_id, error = %err, "eta push socket failed");
                    break;
                }
            }
        }

        self.socket = None;
        None
    }
}
