//! Search generation pipeline.
//!
//! Executes orders of kind `query_full`, `intent_regen`, and
//! `article_regen_keep_title`. The worker owns the terminal status write and
//! lease release; this function only produces artifacts, events, and logs,
//! and raises on the first unrecoverable problem.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::domains::orders::{LogLevel, LogStage, Order, OrderKind, OrderLog};
use crate::kernel::events::{ArticleRef, IntentRef, OrderEvent, Stage};
use crate::kernel::llm::{ArticleRequest, IntentRequest};
use crate::kernel::{CallContext, LeaseOutcome, LeaseScope, ServerKernel, StreamKey};

use super::article::{Article, ArticleUpsert};
use super::intent::Intent;
use super::query::{parse_filetype_operators, Query};
use super::run_stats::{GenerationRun, RunKind};

/// Comfortably exceeds the expected duration of a single stage; renewal is
/// not automatic.
const STAGE_LEASE_SECONDS: i64 = 60;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchOrderPayload {
    #[serde(default)]
    keep_title: bool,
}

pub async fn run_search_order(
    kernel: &Arc<ServerKernel>,
    order: &Order,
) -> Result<Option<String>> {
    let query_id = order.query_id.context("search order has no query_id")?;
    let query = Query::find_by_id(&kernel.db, query_id)
        .await
        .context("order query not found")?;
    let parsed = parse_filetype_operators(&query.value);
    let payload: SearchOrderPayload = order.payload()?.unwrap_or_default();

    let stream = StreamKey::order(order.id);

    if order.kind == OrderKind::QueryFull {
        acquire(kernel, order.id, &LeaseScope::Query { query_id }).await?;
    }

    kernel
        .dispatcher
        .emit(
            &stream,
            Some(order.id),
            &OrderEvent::Started {
                order_id: order.id,
                query_id: Some(query_id),
                kind: order.kind.as_str().to_string(),
                intent_id: order.intent_id,
            },
        )
        .await?;
    OrderLog::append(
        &kernel.db,
        order.id,
        LogStage::Order,
        LogLevel::Info,
        "order started",
        Some(json!({ "kind": order.kind.as_str(), "filetype": parsed.filetype })),
    )
    .await?;

    // Intent phase.
    let intents = match order.kind {
        OrderKind::QueryFull => {
            resolve_intents(kernel, order, &stream, query_id, &query, &parsed.clean, &parsed.filetype)
                .await?
        }
        _ => {
            let intent_id = order.intent_id.context("order has no intent_id")?;
            vec![Intent::find_by_id(&kernel.db, intent_id)
                .await
                .context("order intent not found")?]
        }
    };

    // Article phase, ascending intent id.
    let mut generated = 0usize;
    for intent in &intents {
        acquire(
            kernel,
            order.id,
            &LeaseScope::Intent {
                query_id,
                intent_id: intent.id,
            },
        )
        .await?;

        kernel
            .dispatcher
            .emit(
                &stream,
                Some(order.id),
                &OrderEvent::Progress {
                    order_id: order.id,
                    query_id: Some(query_id),
                    stage: Stage::Article,
                    message: format!("generating article for \"{}\"", intent.title),
                },
            )
            .await?;
        OrderLog::append(
            &kernel.db,
            order.id,
            LogStage::Article,
            LogLevel::Info,
            &format!("generating article for intent {}", intent.id),
            None,
        )
        .await?;

        let article = generate_article(kernel, order, query_id, &query, intent, &parsed, &payload)
            .await?;

        kernel
            .dispatcher
            .emit(
                &stream,
                Some(order.id),
                &OrderEvent::ArticleUpserted {
                    order_id: order.id,
                    query_id: Some(query_id),
                    intent_id: intent.id,
                    article: ArticleRef {
                        id: article.id,
                        title: article.title.clone(),
                        slug: article.slug.clone(),
                        summary: article.summary.clone(),
                    },
                },
            )
            .await?;
        generated += 1;
    }

    Ok(Some(format!("{generated} article(s) generated")))
}

async fn resolve_intents(
    kernel: &Arc<ServerKernel>,
    order: &Order,
    stream: &StreamKey,
    query_id: i64,
    query: &Query,
    clean_query: &str,
    filetype: &str,
) -> Result<Vec<Intent>> {
    Intent::clear_query_links(&kernel.db, query_id).await?;

    kernel
        .dispatcher
        .emit(
            stream,
            Some(order.id),
            &OrderEvent::Progress {
                order_id: order.id,
                query_id: Some(query_id),
                stage: Stage::Intent,
                message: "resolving intents".to_string(),
            },
        )
        .await?;
    OrderLog::append(
        &kernel.db,
        order.id,
        LogStage::Intent,
        LogLevel::Info,
        "resolving intents",
        None,
    )
    .await?;

    let request = IntentRequest {
        query: clean_query.to_string(),
        language: query.language.clone(),
        filetype: filetype.to_string(),
    };
    let executed = kernel
        .executor
        .execute(
            CallContext {
                provider: kernel.provider.name().to_string(),
                component: "search_pipeline".to_string(),
                trigger: "resolve_intent".to_string(),
                request_snapshot: serde_json::to_value(&request).ok(),
            },
            || kernel.provider.resolve_intent(request.clone()),
        )
        .await?;

    let mut intents = Vec::with_capacity(executed.value.items.len());
    for item in executed.value.items {
        let intent = Intent::upsert(
            &kernel.db,
            &item.intent,
            filetype,
            &item.title,
            Some(&item.summary),
        )
        .await?;
        Intent::link_to_query(&kernel.db, query_id, intent.id).await?;
        kernel
            .dispatcher
            .emit(
                stream,
                Some(order.id),
                &OrderEvent::IntentUpserted {
                    order_id: order.id,
                    query_id: Some(query_id),
                    intent: IntentRef {
                        id: intent.id,
                        value: intent.intent_text.clone(),
                    },
                },
            )
            .await?;
        intents.push(intent);
    }

    intents.sort_by_key(|i| i.id);
    Ok(intents)
}

async fn generate_article(
    kernel: &Arc<ServerKernel>,
    order: &Order,
    query_id: i64,
    query: &Query,
    intent: &Intent,
    parsed: &super::query::ParsedQuery,
    payload: &SearchOrderPayload,
) -> Result<Article> {
    let run_id = GenerationRun::start(&kernel.db, order.id, RunKind::Content).await?;
    let phase_started = Instant::now();

    let request = ArticleRequest {
        query: parsed.clean.clone(),
        intent: intent.intent_text.clone(),
        language: query.language.clone(),
        filetype: parsed.filetype.clone(),
    };
    let executed = match kernel
        .executor
        .execute(
            CallContext {
                provider: kernel.provider.name().to_string(),
                component: "search_pipeline".to_string(),
                trigger: "create_article".to_string(),
                request_snapshot: serde_json::to_value(&request).ok(),
            },
            || kernel.provider.create_article(request.clone()),
        )
        .await
    {
        Ok(executed) => executed,
        Err(err) => {
            GenerationRun::fail(
                &kernel.db,
                run_id,
                err.attempts as i64,
                phase_started.elapsed().as_millis() as i64,
                &err.to_string(),
            )
            .await?;
            return Err(err.into());
        }
    };

    // Semantic validation is final: the provider answered, the answer is
    // unusable, and retrying would burn the budget on the same answer.
    let result = executed.value;
    if result.article.content.trim().is_empty() {
        let message = "provider returned an empty article body";
        GenerationRun::fail(
            &kernel.db,
            run_id,
            executed.attempts as i64,
            phase_started.elapsed().as_millis() as i64,
            message,
        )
        .await?;
        bail!(message);
    }
    if result.recommendations.is_empty() {
        let message = "provider returned no recommendations";
        GenerationRun::fail(
            &kernel.db,
            run_id,
            executed.attempts as i64,
            phase_started.elapsed().as_millis() as i64,
            message,
        )
        .await?;
        bail!(message);
    }

    let keep_title = order.kind == OrderKind::ArticleRegenKeepTitle || payload.keep_title;
    let article = Article::upsert(
        &kernel.db,
        ArticleUpsert {
            query_id,
            intent_id: intent.id,
            slug: result.article.slug,
            title: result.article.title,
            summary: intent.summary.clone(),
            content: result.article.content,
            filetype: parsed.filetype.clone(),
            generated_by: result.article.generated_by,
            keep_title,
            replace_existing_for_intent: order.kind != OrderKind::QueryFull,
        },
    )
    .await?;

    GenerationRun::complete(
        &kernel.db,
        run_id,
        article.id,
        executed.attempts as i64,
        phase_started.elapsed().as_millis() as i64,
        executed.llm_duration_ms,
    )
    .await?;

    Ok(article)
}

async fn acquire(kernel: &Arc<ServerKernel>, order_id: i64, scope: &LeaseScope) -> Result<()> {
    match kernel
        .leases
        .try_acquire(order_id, scope, STAGE_LEASE_SECONDS)
        .await?
    {
        LeaseOutcome::Acquired => Ok(()),
        LeaseOutcome::HeldBy { owner_order_id } => {
            bail!("Resource locked by order {owner_order_id}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::orders::{NewOrder, OrderStatus, RequestedBy};
    use crate::kernel::events::{OrderEvent, StreamEvent};
    use crate::kernel::test_support::{test_kernel, test_kernel_with, FailingProvider};

    async fn queued_order(kernel: &Arc<ServerKernel>, kind: OrderKind, query_id: i64, intent_id: Option<i64>) -> Order {
        Order::create(
            &kernel.db,
            NewOrder {
                query_id: Some(query_id),
                kind,
                intent_id,
                article_id: None,
                requested_by: RequestedBy::User,
                request_payload: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn query_full_produces_intents_articles_and_events_in_order() {
        let kernel = test_kernel().await;
        let query = Query::upsert(&kernel.db, "sqlite fts5 bm25", "sqlite fts5 bm25", "en")
            .await
            .unwrap();
        let order = queued_order(&kernel, OrderKind::QueryFull, query.id, None).await;
        Order::claim_next(&kernel.db).await.unwrap().unwrap();

        let summary = run_search_order(&kernel, &Order::find_by_id(&kernel.db, order.id).await.unwrap())
            .await
            .unwrap();
        assert_eq!(summary.as_deref(), Some("3 article(s) generated"));

        let intents = Intent::for_query(&kernel.db, query.id).await.unwrap();
        assert_eq!(intents.len(), 3);
        for intent in &intents {
            assert!(Article::find_for_intent(&kernel.db, intent.id)
                .await
                .unwrap()
                .is_some());
        }

        // Event order: started, progress(intent), 3x intent.upserted, then
        // per intent progress(article) + article.upserted.
        let events: Vec<(i64, OrderEvent)> = kernel
            .dispatcher
            .replay_after(&StreamKey::order(order.id), 0)
            .await
            .unwrap();
        let types: Vec<&str> = events.iter().map(|(_, e)| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "order.started",
                "order.progress",
                "intent.upserted",
                "intent.upserted",
                "intent.upserted",
                "order.progress",
                "article.upserted",
                "order.progress",
                "article.upserted",
                "order.progress",
                "article.upserted",
            ]
        );
        let seqs: Vec<i64> = events.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, (1..=11).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn filetype_operator_flows_into_artifacts() {
        let kernel = test_kernel().await;
        let query = Query::upsert(&kernel.db, "rust filetype:rs", "rust filetype:rs", "en")
            .await
            .unwrap();
        let order = queued_order(&kernel, OrderKind::QueryFull, query.id, None).await;
        Order::claim_next(&kernel.db).await.unwrap().unwrap();

        run_search_order(&kernel, &Order::find_by_id(&kernel.db, order.id).await.unwrap())
            .await
            .unwrap();

        let intents = Intent::for_query(&kernel.db, query.id).await.unwrap();
        assert!(intents.iter().all(|i| i.filetype == "rs"));
        let article = Article::find_for_intent(&kernel.db, intents[0].id)
            .await
            .unwrap()
            .unwrap();
        assert!(article.slug.ends_with(".rs"));
    }

    #[tokio::test]
    async fn intent_regen_reuses_the_stored_intent() {
        let kernel = test_kernel().await;
        let query = Query::upsert(&kernel.db, "rust async", "rust async", "en")
            .await
            .unwrap();
        let intent = Intent::upsert(&kernel.db, "rust async overview", "md", "Overview", None)
            .await
            .unwrap();
        Intent::link_to_query(&kernel.db, query.id, intent.id)
            .await
            .unwrap();

        let order = queued_order(&kernel, OrderKind::IntentRegen, query.id, Some(intent.id)).await;
        Order::claim_next(&kernel.db).await.unwrap().unwrap();

        run_search_order(&kernel, &Order::find_by_id(&kernel.db, order.id).await.unwrap())
            .await
            .unwrap();

        // No re-resolution: still exactly one linked intent.
        assert_eq!(Intent::for_query(&kernel.db, query.id).await.unwrap().len(), 1);
        assert!(Article::find_for_intent(&kernel.db, intent.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn lease_held_by_sibling_fails_the_order_with_the_owner_id() {
        let kernel = test_kernel().await;
        let query = Query::upsert(&kernel.db, "locked", "locked", "en").await.unwrap();
        let order = queued_order(&kernel, OrderKind::QueryFull, query.id, None).await;

        // A sibling order grabbed the query scope after acceptance.
        kernel
            .leases
            .try_acquire(9999, &LeaseScope::Query { query_id: query.id }, 60)
            .await
            .unwrap();
        Order::claim_next(&kernel.db).await.unwrap().unwrap();

        let err = run_search_order(&kernel, &Order::find_by_id(&kernel.db, order.id).await.unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Resource locked by order 9999");
    }

    #[tokio::test]
    async fn provider_failure_fails_the_order_and_records_the_run() {
        let kernel = test_kernel_with(std::sync::Arc::new(FailingProvider)).await;
        let query = Query::upsert(&kernel.db, "q", "q", "en").await.unwrap();
        let order = queued_order(&kernel, OrderKind::QueryFull, query.id, None).await;
        Order::claim_next(&kernel.db).await.unwrap().unwrap();

        let err = run_search_order(&kernel, &Order::find_by_id(&kernel.db, order.id).await.unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider unavailable"));

        // Two attempts, two durable failure rows.
        let failures: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM llm_failures")
            .fetch_one(&kernel.db)
            .await
            .unwrap();
        assert_eq!(failures, 2);

        // Worker-level wiring marks the order failed; here the order is
        // still running because the worker owns the terminal write.
        let current = Order::find_by_id(&kernel.db, order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Running);
    }
}
