//! Order endpoints: creation with scope conflict checks, reads, logs,
//! cancellation, and run statistics.

use std::sync::Arc;

use axum::extract::{Path, Query as UrlQuery, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::{ApiError, StoreError};
use crate::domains::orders::{
    check_availability, NewOrder, Order, OrderKind, OrderLog, RequestedBy,
};
use crate::domains::search::{GenerationRun, Intent, Query};
use crate::kernel::ServerKernel;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    kind: Option<String>,
    query_id: Option<i64>,
    intent_id: Option<i64>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

pub async fn create_order_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = body
        .kind
        .as_deref()
        .and_then(OrderKind::parse)
        .ok_or_else(|| ApiError::BadRequest("invalid order kind".to_string()))?;

    if kind == OrderKind::MailReply {
        return Err(ApiError::BadRequest(
            "mail orders are created through the mail endpoints".to_string(),
        ));
    }

    let query_id = body
        .query_id
        .ok_or_else(|| ApiError::BadRequest("queryId is required".to_string()))?;
    Query::find_by_id(&kernel.db, query_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => ApiError::NotFound(format!("query {query_id} not found")),
            other => other.into(),
        })?;

    let intent_id = if kind.is_per_intent() {
        let intent_id = body
            .intent_id
            .ok_or_else(|| ApiError::BadRequest("intentId is required".to_string()))?;
        Intent::find_by_id(&kernel.db, intent_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => {
                    ApiError::NotFound(format!("intent {intent_id} not found"))
                }
                other => other.into(),
            })?;
        Some(intent_id)
    } else {
        None
    };

    let availability = check_availability(&kernel.db, kind, Some(query_id), intent_id).await?;
    if !availability.available {
        return Err(ApiError::ResourceLocked {
            active_order_id: availability.active_order_id.unwrap_or_default(),
            scope: availability.scope,
        });
    }

    let order = Order::create(
        &kernel.db,
        NewOrder {
            query_id: Some(query_id),
            kind,
            intent_id,
            article_id: None,
            requested_by: RequestedBy::User,
            request_payload: body.payload,
        },
    )
    .await?;

    tracing::info!(order_id = order.id, kind = kind.as_str(), query_id, "order accepted");
    Ok(Json(json!({
        "orderId": order.id,
        "queryId": query_id,
        "kind": order.kind,
        "status": order.status,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityParams {
    kind: Option<String>,
    query_id: Option<i64>,
    intent_id: Option<i64>,
}

pub async fn availability_handler(
    State(kernel): State<Arc<ServerKernel>>,
    UrlQuery(params): UrlQuery<AvailabilityParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = params
        .kind
        .as_deref()
        .and_then(OrderKind::parse)
        .ok_or_else(|| ApiError::BadRequest("invalid order kind".to_string()))?;
    if kind != OrderKind::MailReply && params.query_id.is_none() {
        return Err(ApiError::BadRequest("queryId is required".to_string()));
    }
    if kind.is_per_intent() && params.intent_id.is_none() {
        return Err(ApiError::BadRequest("intentId is required".to_string()));
    }

    let availability =
        check_availability(&kernel.db, kind, params.query_id, params.intent_id).await?;
    Ok(Json(serde_json::to_value(availability).map_err(anyhow::Error::from)?))
}

pub async fn get_order_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = Order::find_by_id(&kernel.db, id).await.map_err(|e| match e {
        StoreError::NotFound => ApiError::NotFound(format!("order {id} not found")),
        other => other.into(),
    })?;
    Ok(Json(json!({ "order": order })))
}

pub async fn list_orders_handler(
    State(kernel): State<Arc<ServerKernel>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orders = Order::list(&kernel.db, 200).await?;
    Ok(Json(json!({ "orders": orders })))
}

pub async fn order_logs_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Order::find_by_id(&kernel.db, id).await.map_err(|e| match e {
        StoreError::NotFound => ApiError::NotFound(format!("order {id} not found")),
        other => other.into(),
    })?;
    let logs = OrderLog::for_order(&kernel.db, id).await?;
    Ok(Json(json!({ "logs": logs })))
}

/// `queued → cancelled` only; a running order is left alone.
pub async fn cancel_order_handler(
    State(kernel): State<Arc<ServerKernel>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Order::find_by_id(&kernel.db, id).await.map_err(|e| match e {
        StoreError::NotFound => ApiError::NotFound(format!("order {id} not found")),
        other => other.into(),
    })?;

    if !Order::cancel(&kernel.db, id).await? {
        return Err(ApiError::BadRequest(
            "only queued orders can be cancelled".to_string(),
        ));
    }
    let order = Order::find_by_id(&kernel.db, id).await?;
    Ok(Json(json!({ "order": order })))
}

/// Latency estimates from finished generation runs.
pub async fn run_stats_handler(
    State(kernel): State<Arc<ServerKernel>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runs = GenerationRun::stats(&kernel.db).await?;
    Ok(Json(json!({ "runs": runs })))
}
