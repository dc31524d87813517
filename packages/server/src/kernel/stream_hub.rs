//! In-process fan-out hub for live event frames.
//!
//! Channel-keyed broadcast senders push durable event frames to SSE
//! endpoints. The hub knows nothing about event semantics; the dispatcher
//! persists first and publishes second, so a frame seen here is already on
//! disk.
//!
//! Producers: `dispatcher.emit(...)` after the durable write.
//! Consumers: SSE handlers via `hub.subscribe("order:42")`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::events::EventFrame;

/// Thread-safe, cloneable. Keyed by channel strings such as `order:42` or
/// `mail:6f9a...`.
#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<EventFrame>>>>,
    capacity: usize,
}

impl StreamHub {
    /// Default capacity of 256 frames per channel; a subscriber that lags
    /// further than that sees a `Lagged` error and should resync via replay.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Deliver a frame to current subscribers. No-op without subscribers;
    /// a dropped receiver never blocks the send.
    pub async fn publish(&self, channel: &str, frame: EventFrame) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(channel) {
            let _ = tx.send(frame);
        }
    }

    /// Subscribe to a channel, creating it if needed.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<EventFrame> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Drop channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}
