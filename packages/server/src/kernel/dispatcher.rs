//! Durable event dispatcher: append, fan-out, replay.
//!
//! Every emit is persisted with a dense per-stream sequence number inside one
//! transaction, then handed to live subscribers. A subscriber attached before
//! `emit` returns is guaranteed delivery of that frame; one attached later
//! must resync with `replay_after`. Replay uses a tolerant decoder: rows
//! whose payload no longer parses are skipped, not fatal.

use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::common::{now_iso, StoreError};

use super::events::{EventFrame, StreamEvent};
use super::stream_hub::StreamHub;

/// Identifies one event stream: an order's stream or a mail thread's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKey {
    topic: &'static str,
    entity: String,
}

impl StreamKey {
    pub fn order(order_id: i64) -> Self {
        Self {
            topic: "order",
            entity: order_id.to_string(),
        }
    }

    pub fn mail(thread_uid: &str) -> Self {
        Self {
            topic: "mail",
            entity: thread_uid.to_string(),
        }
    }

    pub fn topic(&self) -> &str {
        self.topic
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Hub channel name, e.g. `order:42`.
    pub fn channel(&self) -> String {
        format!("{}:{}", self.topic, self.entity)
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    pool: SqlitePool,
    hub: StreamHub,
}

impl EventDispatcher {
    pub fn new(pool: SqlitePool, hub: StreamHub) -> Self {
        Self { pool, hub }
    }

    /// Persist the event with the stream's next sequence number, then fan it
    /// out to subscribers registered at this moment. Returns the assigned
    /// `seq`.
    pub async fn emit<E: StreamEvent>(
        &self,
        stream: &StreamKey,
        order_id: Option<i64>,
        event: &E,
    ) -> anyhow::Result<i64> {
        let payload = serde_json::to_value(event)?;
        let event_type = event.event_type();

        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;

        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM order_events
             WHERE stream_topic = ? AND stream_entity = ?",
        )
        .bind(stream.topic())
        .bind(stream.entity())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        sqlx::query(
            r#"
            INSERT INTO order_events
                (stream_topic, stream_entity, order_id, seq, type, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stream.topic())
        .bind(stream.entity())
        .bind(order_id)
        .bind(seq)
        .bind(event_type)
        .bind(payload.to_string())
        .bind(now_iso())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        tx.commit().await.map_err(StoreError::classify)?;

        tracing::debug!(
            stream = %stream.channel(),
            seq,
            event_type,
            "event persisted"
        );

        self.hub
            .publish(
                &stream.channel(),
                EventFrame {
                    seq,
                    event_type: event_type.to_string(),
                    payload,
                },
            )
            .await;

        Ok(seq)
    }

    /// Attach a live subscriber to the stream.
    pub async fn subscribe(&self, stream: &StreamKey) -> broadcast::Receiver<EventFrame> {
        self.hub.subscribe(&stream.channel()).await
    }

    /// Read back persisted events with `seq > after_seq`, ascending.
    /// Rows that fail to decode as `E` are skipped.
    pub async fn replay_after<E: DeserializeOwned>(
        &self,
        stream: &StreamKey,
        after_seq: i64,
    ) -> Result<Vec<(i64, E)>, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT seq, payload FROM order_events
             WHERE stream_topic = ? AND stream_entity = ? AND seq > ?
             ORDER BY seq ASC",
        )
        .bind(stream.topic())
        .bind(stream.entity())
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::classify)?;

        let mut events = Vec::with_capacity(rows.len());
        for (seq, payload) in rows {
            match serde_json::from_str::<E>(&payload) {
                Ok(event) => events.push((seq, event)),
                Err(e) => {
                    tracing::debug!(stream = %stream.channel(), seq, error = %e, "skipping malformed event row");
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::events::OrderEvent;

    async fn dispatcher() -> EventDispatcher {
        let pool = crate::kernel::test_support::test_pool().await;
        EventDispatcher::new(pool, StreamHub::new())
    }

    fn progress(order_id: i64, message: &str) -> OrderEvent {
        OrderEvent::Progress {
            order_id,
            query_id: Some(1),
            stage: crate::kernel::events::Stage::Intent,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn seq_is_dense_per_stream_starting_at_one() {
        let d = dispatcher().await;
        let stream = StreamKey::order(1);

        for i in 1..=4 {
            let seq = d
                .emit(&stream, Some(1), &progress(1, &format!("step {i}")))
                .await
                .unwrap();
            assert_eq!(seq, i);
        }

        // A second stream starts over at 1.
        let other = StreamKey::order(2);
        assert_eq!(d.emit(&other, Some(2), &progress(2, "x")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn live_subscriber_gets_the_frame_with_its_seq() {
        let d = dispatcher().await;
        let stream = StreamKey::order(5);
        let mut rx = d.subscribe(&stream).await;

        d.emit(&stream, Some(5), &progress(5, "hello")).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.seq, 1);
        assert_eq!(frame.event_type, "order.progress");
        assert_eq!(frame.payload["message"], "hello");
    }

    #[tokio::test]
    async fn replay_filters_by_cursor_and_orders_ascending() {
        let d = dispatcher().await;
        let stream = StreamKey::order(9);
        for i in 1..=5 {
            d.emit(&stream, Some(9), &progress(9, &format!("m{i}")))
                .await
                .unwrap();
        }

        let events: Vec<(i64, OrderEvent)> = d.replay_after(&stream, 3).await.unwrap();
        let seqs: Vec<i64> = events.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[tokio::test]
    async fn replay_skips_rows_that_no_longer_parse() {
        let d = dispatcher().await;
        let stream = StreamKey::order(3);
        d.emit(&stream, Some(3), &progress(3, "good")).await.unwrap();

        // Corrupt a row the way an old schema version would.
        sqlx::query(
            "INSERT INTO order_events
                 (stream_topic, stream_entity, order_id, seq, type, payload, created_at)
             VALUES ('order', '3', 3, 2, 'order.progress', '{\"type\":\"unknown.event\"}', '2026-01-01T00:00:00.000Z')",
        )
        .execute(&d.pool)
        .await
        .unwrap();
        d.emit(&stream, Some(3), &progress(3, "after")).await.unwrap();

        let events: Vec<(i64, OrderEvent)> = d.replay_after(&stream, 0).await.unwrap();
        let seqs: Vec<i64> = events.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[tokio::test]
    async fn subscriber_attached_after_emit_must_use_replay() {
        let d = dispatcher().await;
        let stream = StreamKey::order(7);
        d.emit(&stream, Some(7), &progress(7, "early")).await.unwrap();

        let mut rx = d.subscribe(&stream).await;
        assert!(rx.try_recv().is_err());

        let events: Vec<(i64, OrderEvent)> = d.replay_after(&stream, 0).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
