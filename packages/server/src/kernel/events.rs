//! Event types carried on order and mail streams.
//!
//! Events are facts, not commands. They are persisted as tagged JSON (the
//! `type` field carries the wire name) and replayed through a tolerant
//! decoder: rows that no longer parse are skipped rather than failing the
//! stream.

use serde::{Deserialize, Serialize};

/// What the stream hub hands to live subscribers: the durable sequence
/// number plus the already-serialized event.
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub seq: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Serializable event that knows its wire name.
pub trait StreamEvent: Serialize {
    fn event_type(&self) -> &'static str;

    /// Whether subscribers should be closed after this event.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Pipeline stage reported by progress events and operator logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Spell,
    Intent,
    Article,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRef {
    pub id: i64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRef {
    pub id: i64,
    pub title: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Events on an order's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    #[serde(rename = "order.started", rename_all = "camelCase")]
    Started {
        order_id: i64,
        query_id: Option<i64>,
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent_id: Option<i64>,
    },

    #[serde(rename = "order.progress", rename_all = "camelCase")]
    Progress {
        order_id: i64,
        query_id: Option<i64>,
        stage: Stage,
        message: String,
    },

    #[serde(rename = "intent.upserted", rename_all = "camelCase")]
    IntentUpserted {
        order_id: i64,
        query_id: Option<i64>,
        intent: IntentRef,
    },

    #[serde(rename = "article.upserted", rename_all = "camelCase")]
    ArticleUpserted {
        order_id: i64,
        query_id: Option<i64>,
        intent_id: i64,
        article: ArticleRef,
    },

    #[serde(rename = "order.completed", rename_all = "camelCase")]
    Completed {
        order_id: i64,
        query_id: Option<i64>,
    },

    #[serde(rename = "order.failed", rename_all = "camelCase")]
    Failed {
        order_id: i64,
        query_id: Option<i64>,
        message: String,
    },
}

impl StreamEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Started { .. } => "order.started",
            OrderEvent::Progress { .. } => "order.progress",
            OrderEvent::IntentUpserted { .. } => "intent.upserted",
            OrderEvent::ArticleUpserted { .. } => "article.upserted",
            OrderEvent::Completed { .. } => "order.completed",
            OrderEvent::Failed { .. } => "order.failed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, OrderEvent::Completed { .. } | OrderEvent::Failed { .. })
    }
}

/// Events on a mail thread's stream. Mail streams have no terminal event;
/// the thread outlives any single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MailEvent {
    #[serde(rename = "mail.job.started", rename_all = "camelCase")]
    JobStarted { thread_uid: String, order_id: i64 },

    #[serde(rename = "mail.reply.created", rename_all = "camelCase")]
    ReplyCreated {
        thread_uid: String,
        reply_id: i64,
        role: String,
        content: String,
        attachment_count: i64,
    },

    #[serde(rename = "mail.thread.updated", rename_all = "camelCase")]
    ThreadUpdated {
        thread_uid: String,
        title: String,
        updated_at: String,
    },

    #[serde(rename = "mail.unread.changed", rename_all = "camelCase")]
    UnreadChanged { thread_uid: String, unread_count: i64 },
}

impl StreamEvent for MailEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MailEvent::JobStarted { .. } => "mail.job.started",
            MailEvent::ReplyCreated { .. } => "mail.reply.created",
            MailEvent::ThreadUpdated { .. } => "mail.thread.updated",
            MailEvent::UnreadChanged { .. } => "mail.unread.changed",
        }
    }
}
