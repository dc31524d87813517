//! SSE streaming endpoints.
//!
//! Replay-then-live: the handler subscribes to the hub first, reads the
//! persisted events after the client's cursor, streams those, then switches
//! to live frames filtered to `seq > cursor` so the overlap window between
//! replay and subscription cannot duplicate or drop an event.
//!
//! Resume cursor: `Last-Event-ID` header, or `lastEventId`/`afterSeq` query
//! params. Each message carries `id: <seq>`; heartbeats every 15 s; a
//! terminal order event ends the response.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::common::{ApiError, StoreError};
use crate::domains::mail::MailThread;
use crate::domains::orders::Order;
use crate::kernel::events::{MailEvent, OrderEvent, StreamEvent};
use crate::kernel::{ServerKernel, StreamKey};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    last_event_id: Option<i64>,
    after_seq: Option<i64>,
}

fn resume_cursor(headers: &HeaderMap, params: &StreamParams) -> i64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(params.last_event_id)
        .or(params.after_seq)
        .unwrap_or(0)
}

fn sse_event(seq: i64, event_type: &str, payload: &serde_json::Value) -> Event {
    Event::default()
        .id(seq.to_string())
        .event(event_type)
        .data(payload.to_string())
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping")
}

type Frame = (i64, String, serde_json::Value);

/// Replay + live merged into one frame stream.
async fn frame_stream<E>(
    kernel: &Arc<ServerKernel>,
    stream_key: StreamKey,
    after_seq: i64,
) -> Result<impl Stream<Item = Frame>, StoreError>
where
    E: StreamEvent + serde::de::DeserializeOwned,
{
    // Subscribe before reading the replay so nothing falls in the gap.
    let rx = kernel.dispatcher.subscribe(&stream_key).await;
    let replay: Vec<(i64, E)> = kernel.dispatcher.replay_after(&stream_key, after_seq).await?;
    let cursor = replay.last().map(|(seq, _)| *seq).unwrap_or(after_seq);

    let replayed: Vec<Frame> = replay
        .into_iter()
        .filter_map(|(seq, event)| {
            serde_json::to_value(&event)
                .ok()
                .map(|payload| (seq, event.event_type().to_string(), payload))
        })
        .collect();

    let live = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            // Frames at or below the cursor were already replayed.
            Ok(frame) if frame.seq > cursor => {
                Some((frame.seq, frame.event_type, frame.payload))
            }
            _ => None,
        }
    });

    Ok(stream::iter(replayed).chain(live))
}

pub async fn order_stream_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    UrlQuery(params): UrlQuery<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    Order::find_by_id(&kernel.db, id).await.map_err(|e| match e {
        StoreError::NotFound => ApiError::NotFound(format!("order {id} not found")),
        other => other.into(),
    })?;

    let after_seq = resume_cursor(&headers, &params);
    let frames = frame_stream::<OrderEvent>(&kernel, StreamKey::order(id), after_seq).await?;

    // Close after the terminal event, inclusive.
    let bounded = frames.scan(false, |done, (seq, ty, payload)| {
        if *done {
            return futures::future::ready(None);
        }
        if ty == "order.completed" || ty == "order.failed" {
            *done = true;
        }
        futures::future::ready(Some((seq, ty, payload)))
    });

    let events = bounded.map(|(seq, ty, payload)| Ok(sse_event(seq, &ty, &payload)));
    Ok(Sse::new(events).keep_alive(keep_alive()))
}

pub async fn mail_stream_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    UrlQuery(params): UrlQuery<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let thread = MailThread::find_by_uid(&kernel.db, &uid)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => ApiError::NotFound(format!("thread {uid} not found")),
            other => other.into(),
        })?;

    let after_seq = resume_cursor(&headers, &params);
    let frames = frame_stream::<MailEvent>(&kernel, StreamKey::mail(&thread.uid), after_seq).await?;

    // Mail streams stay open; the thread outlives any single order.
    let events = frames.map(|(seq, ty, payload)| Ok(sse_event(seq, &ty, &payload)));
    Ok(Sse::new(events).keep_alive(keep_alive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert("last-event-id", v.parse().unwrap());
        }
        headers
    }

    #[test]
    fn header_cursor_wins_over_query_params() {
        let params = StreamParams {
            last_event_id: Some(5),
            after_seq: Some(9),
        };
        assert_eq!(resume_cursor(&header_map(Some("3")), &params), 3);
    }

    #[test]
    fn query_params_back_up_a_missing_header() {
        let params = StreamParams {
            last_event_id: None,
            after_seq: Some(9),
        };
        assert_eq!(resume_cursor(&header_map(None), &params), 9);

        let params = StreamParams {
            last_event_id: Some(5),
            after_seq: Some(9),
        };
        assert_eq!(resume_cursor(&header_map(None), &params), 5);
    }

    #[test]
    fn missing_cursor_defaults_to_zero() {
        let params = StreamParams {
            last_event_id: None,
            after_seq: None,
        };
        assert_eq!(resume_cursor(&header_map(None), &params), 0);
        assert_eq!(resume_cursor(&header_map(Some("junk")), &params), 0);
    }
}
