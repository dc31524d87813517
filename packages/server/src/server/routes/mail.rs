//! Mail endpoints: thread creation, user replies (which enqueue generation
//! orders), reads, and attachment downloads.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::{ApiError, StoreError};
use crate::domains::mail::{
    MailAttachment, MailOrderPayload, MailReply, MailThread, ReplyRole, ReplyStatus,
};
use crate::domains::orders::{NewOrder, Order, OrderKind, RequestedBy};
use crate::kernel::events::MailEvent;
use crate::kernel::{ServerKernel, StreamKey};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadBody {
    title: Option<String>,
    content: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReplyBody {
    content: Option<String>,
    model: Option<String>,
}

fn require_content(content: Option<&str>) -> Result<String, ApiError> {
    content
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("content must not be empty".to_string()))
}

/// Append the user's reply and enqueue the generation order for it.
async fn enqueue_reply(
    kernel: &Arc<ServerKernel>,
    thread: &MailThread,
    content: &str,
    model: Option<String>,
) -> Result<(MailReply, Order), ApiError> {
    let reply = MailReply::append(
        &kernel.db,
        thread.id,
        ReplyRole::User,
        content,
        ReplyStatus::Completed,
        false,
        None,
    )
    .await?;

    let payload = MailOrderPayload {
        thread_id: thread.id,
        user_reply_id: reply.id,
        requested_model: model,
    };
    let order = Order::create(
        &kernel.db,
        NewOrder {
            query_id: None,
            kind: OrderKind::MailReply,
            intent_id: None,
            article_id: None,
            requested_by: RequestedBy::User,
            request_payload: Some(serde_json::to_value(&payload).map_err(anyhow::Error::from)?),
        },
    )
    .await?;

    MailThread::touch(&kernel.db, thread.id).await?;
    tracing::info!(order_id = order.id, thread_uid = %thread.uid, "mail reply order accepted");
    Ok((reply, order))
}

pub async fn create_thread_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Json(body): Json<CreateThreadBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = require_content(body.content.as_deref())?;
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let thread = MailThread::create(&kernel.db, title).await?;
    let (reply, order) = enqueue_reply(&kernel, &thread, &content, body.model).await?;

    Ok(Json(json!({
        "threadUid": thread.uid,
        "userReplyId": reply.id,
        "jobId": order.id,
    })))
}

pub async fn append_reply_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(uid): Path<String>,
    Json(body): Json<AppendReplyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = require_content(body.content.as_deref())?;
    let thread = find_thread(&kernel, &uid).await?;
    let (reply, order) = enqueue_reply(&kernel, &thread, &content, body.model).await?;

    Ok(Json(json!({
        "threadUid": thread.uid,
        "userReplyId": reply.id,
        "jobId": order.id,
    })))
}

pub async fn list_threads_handler(
    State(kernel): State<Arc<ServerKernel>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let threads = MailThread::list(&kernel.db).await?;
    let mut out = Vec::with_capacity(threads.len());
    for thread in threads {
        let unread = MailThread::unread_count(&kernel.db, thread.id).await?;
        let mut value = serde_json::to_value(&thread).map_err(anyhow::Error::from)?;
        value["unreadCount"] = json!(unread);
        out.push(value);
    }
    Ok(Json(json!({ "threads": out })))
}

pub async fn get_thread_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(uid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let thread = find_thread(&kernel, &uid).await?;
    let history = MailReply::history(&kernel.db, thread.id).await?;

    let mut replies = Vec::with_capacity(history.len());
    for reply in history {
        let attachments = MailAttachment::for_reply(&kernel.db, reply.id).await?;
        let mut value = serde_json::to_value(&reply).map_err(anyhow::Error::from)?;
        value["attachments"] =
            serde_json::to_value(&attachments).map_err(anyhow::Error::from)?;
        replies.push(value);
    }

    Ok(Json(json!({ "thread": thread, "replies": replies })))
}

pub async fn mark_read_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(uid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let thread = find_thread(&kernel, &uid).await?;
    MailThread::mark_read(&kernel.db, thread.id).await?;

    kernel
        .dispatcher
        .emit(
            &StreamKey::mail(&thread.uid),
            None,
            &MailEvent::UnreadChanged {
                thread_uid: thread.uid.clone(),
                unread_count: 0,
            },
        )
        .await?;

    Ok(Json(json!({ "unreadCount": 0 })))
}

pub async fn attachment_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let attachment = MailAttachment::find_by_id(&kernel.db, id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => ApiError::NotFound(format!("attachment {id} not found")),
            other => other.into(),
        })?;

    Ok((
        [(header::CONTENT_TYPE, attachment.mime_type.clone())],
        attachment.bytes(),
    ))
}

async fn find_thread(kernel: &Arc<ServerKernel>, uid: &str) -> Result<MailThread, ApiError> {
    MailThread::find_by_uid(&kernel.db, uid)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => ApiError::NotFound(format!("thread {uid} not found")),
            other => other.into(),
        })
}
