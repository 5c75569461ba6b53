//! Fan-out of [`RunEvent`]s to every connected subscriber.
//!
//! [`Broadcaster`] is transport-agnostic: each subscriber is an unbounded
//! channel of [`Outbound`] frames that the transport (the WebSocket handler)
//! drains into its socket. It is designed to be shared via
//! `Arc<Broadcaster>` across the application.

use std::collections::HashMap;
use std::sync::Arc;

use actlocal_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

use crate::event::RunEvent;

/// A frame queued for one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A serialized [`RunEvent`], shared between all recipients.
    Event(Arc<str>),
    /// Keep-alive ping.
    Ping,
    /// The daemon is shutting down.
    Close,
}

/// Channel sender half for pushing frames to a subscriber.
pub type SubscriberSender = mpsc::UnboundedSender<Outbound>;

struct Subscriber {
    sender: SubscriberSender,
    connected_at: Timestamp,
}

pub struct Broadcaster {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber and queue its `hello` frame.
    ///
    /// `hello` is evaluated while the subscriber set is locked for writing,
    /// so any event broadcast after the snapshot was taken is delivered
    /// after the `hello` frame, and nothing is lost in between.
    pub async fn subscribe<F>(&self, conn_id: String, hello: F) -> mpsc::UnboundedReceiver<Outbound>
    where
        F: FnOnce() -> RunEvent,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.write().await;

        if let Some(payload) = serialize(&hello()) {
            let _ = tx.send(Outbound::Event(payload));
        }
        subscribers.insert(
            conn_id,
            Subscriber {
                sender: tx,
                connected_at: chrono::Utc::now(),
            },
        );
        rx
    }

    /// Remove a subscriber. Called only when its own connection goes away.
    pub async fn unsubscribe(&self, conn_id: &str) {
        if let Some(sub) = self.subscribers.write().await.remove(conn_id) {
            let connected_secs = (chrono::Utc::now() - sub.connected_at).num_seconds();
            tracing::debug!(conn_id, connected_secs, "Subscriber removed");
        }
    }

    /// Serialize `event` once and queue it for every subscriber.
    ///
    /// Delivery failures (a subscriber whose receiver is already gone) are
    /// ignored; that subscriber is cleaned up by its own disconnect path.
    pub async fn broadcast(&self, event: &RunEvent) {
        let Some(payload) = serialize(event) else {
            return;
        };
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values() {
            let _ = sub.sender.send(Outbound::Event(Arc::clone(&payload)));
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Queue a keep-alive ping for every subscriber.
    pub async fn ping_all(&self) {
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values() {
            let _ = sub.sender.send(Outbound::Ping);
        }
    }

    /// Send a close frame to every subscriber, then clear the set.
    pub async fn shutdown_all(&self) {
        let mut subscribers = self.subscribers.write().await;
        let count = subscribers.len();
        for sub in subscribers.values() {
            let _ = sub.sender.send(Outbound::Close);
        }
        subscribers.clear();
        tracing::info!(count, "Closed all subscribers");
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(event: &RunEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "Failed to serialize event");
            None
        }
    }
}
