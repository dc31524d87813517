//! Acceptance-time conflict rules for order creation.
//!
//! A `query_full` order for query Q blocks every other order touching Q; a
//! per-intent order blocks only its own `(Q, intent)` scope but is itself
//! rejected while a `query_full` order for Q is active. Mail orders carry no
//! search scope and are always accepted here.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::common::StoreError;

use super::order::{Order, OrderKind};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_order_id: Option<i64>,
    pub scope: String,
}

impl Availability {
    fn open(scope: &str) -> Self {
        Self {
            available: true,
            reason: "available".to_string(),
            active_order_id: None,
            scope: scope.to_string(),
        }
    }

    fn locked(blocker: &Order, scope: &str, reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: reason.into(),
            active_order_id: Some(blocker.id),
            scope: scope.to_string(),
        }
    }
}

/// Decide whether a new order of `kind` may be created for the given scope.
pub async fn check_availability(
    pool: &SqlitePool,
    kind: OrderKind,
    query_id: Option<i64>,
    intent_id: Option<i64>,
) -> Result<Availability, StoreError> {
    if kind == OrderKind::MailReply {
        return Ok(Availability::open("thread"));
    }

    let Some(query_id) = query_id else {
        // Search orders without a query never reach the worker; the route
        // rejects them before calling here.
        return Ok(Availability::open("query"));
    };

    let active = Order::find_active_for_query(pool, query_id).await?;

    match kind {
        OrderKind::QueryFull => {
            // Any active order on the query blocks a full regeneration.
            if let Some(blocker) = active.first() {
                let scope = if blocker.kind == OrderKind::QueryFull {
                    "query"
                } else {
                    "intent"
                };
                return Ok(Availability::locked(
                    blocker,
                    scope,
                    format!("query {query_id} has an active order"),
                ));
            }
            Ok(Availability::open("query"))
        }
        OrderKind::IntentRegen | OrderKind::ArticleRegenKeepTitle => {
            if let Some(blocker) = active.iter().find(|o| o.kind == OrderKind::QueryFull) {
                return Ok(Availability::locked(
                    blocker,
                    "query",
                    format!("query {query_id} is being fully regenerated"),
                ));
            }
            if let Some(blocker) = active
                .iter()
                .find(|o| o.kind.is_per_intent() && o.intent_id == intent_id)
            {
                return Ok(Availability::locked(
                    blocker,
                    "intent",
                    "intent already has an active order",
                ));
            }
            Ok(Availability::open("intent"))
        }
        OrderKind::MailReply => unreachable!("handled above"),
    }
}
