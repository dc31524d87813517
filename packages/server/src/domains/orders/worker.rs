//! Order worker: the single cooperative dispatch loop.
//!
//! One worker per process. Each tick requeues expired runs, claims the oldest
//! queued order, executes its pipeline, writes the terminal status, and
//! releases every lease the order held. Store transactions serialize anyway
//! and the LLM provider is the bottleneck, so there is nothing to gain from
//! running pipelines in parallel.
//!
//! ```text
//! idle ──[poll]──> requeue expired ──> claim next ──┬── none: sleep(Δ)
//!                                                   └── claimed: execute
//!                                                          ├── ok    → complete
//!                                                          └── error → fail
//!                                                   then release leases
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domains::mail::run_mail_order;
use crate::domains::search::run_search_order;
use crate::kernel::events::OrderEvent;
use crate::kernel::{ServerKernel, StreamKey};

use super::order::{Order, OrderKind};
use super::order_log::{LogLevel, LogStage, OrderLog};

#[derive(Debug, Clone)]
pub struct OrderWorkerConfig {
    /// How long to sleep when the queue is empty.
    pub poll_interval: Duration,
    /// A `running` order older than this is considered abandoned and
    /// requeued.
    pub max_run_seconds: i64,
}

impl Default for OrderWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_run_seconds: 300,
        }
    }
}

pub struct OrderWorker {
    kernel: Arc<ServerKernel>,
    config: OrderWorkerConfig,
}

impl OrderWorker {
    pub fn new(kernel: Arc<ServerKernel>) -> Self {
        Self {
            kernel,
            config: OrderWorkerConfig::default(),
        }
    }

    pub fn with_config(kernel: Arc<ServerKernel>, config: OrderWorkerConfig) -> Self {
        Self { kernel, config }
    }

    /// Run until the token is cancelled. Cancellation is checked at the top
    /// of each tick; an in-flight pipeline finishes its order first.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            max_run_seconds = self.config.max_run_seconds,
            "order worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.tick().await {
                Ok(true) => {
                    // Executed an order; look for the next one immediately.
                }
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "worker tick failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!("order worker stopped");
    }

    /// One tick: recover, claim, execute. Returns whether an order ran.
    pub async fn tick(&self) -> anyhow::Result<bool> {
        let requeued = Order::requeue_expired(&self.kernel.db, self.config.max_run_seconds).await?;
        if requeued > 0 {
            warn!(count = requeued, "requeued expired running orders");
        }

        let Some(order) = Order::claim_next(&self.kernel.db).await? else {
            return Ok(false);
        };

        debug!(order_id = order.id, kind = order.kind.as_str(), "claimed order");
        self.execute(order).await;
        Ok(true)
    }

    /// Execute one claimed order and write its terminal state. Lease release
    /// is unconditional: the `finally` of every order execution.
    async fn execute(&self, order: Order) {
        let order_id = order.id;
        let query_id = order.query_id;
        let stream = StreamKey::order(order_id);

        let result = match order.kind {
            OrderKind::MailReply => run_mail_order(&self.kernel, &order).await,
            _ => run_search_order(&self.kernel, &order).await,
        };

        match result {
            Ok(summary) => {
                if let Err(e) = Order::complete(&self.kernel.db, order_id, summary.as_deref()).await
                {
                    error!(order_id, error = %e, "failed to mark order completed");
                }
                if let Err(e) = self
                    .kernel
                    .dispatcher
                    .emit(&stream, Some(order_id), &OrderEvent::Completed { order_id, query_id })
                    .await
                {
                    error!(order_id, error = %e, "failed to emit order.completed");
                }
                let _ = OrderLog::append(
                    &self.kernel.db,
                    order_id,
                    LogStage::Order,
                    LogLevel::Info,
                    "order completed",
                    None,
                )
                .await;
                info!(order_id, "order completed");
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(mark_err) = Order::fail(&self.kernel.db, order_id, &message).await {
                    error!(order_id, error = %mark_err, "failed to mark order failed");
                }
                if let Err(emit_err) = self
                    .kernel
                    .dispatcher
                    .emit(
                        &stream,
                        Some(order_id),
                        &OrderEvent::Failed {
                            order_id,
                            query_id,
                            message: message.clone(),
                        },
                    )
                    .await
                {
                    error!(order_id, error = %emit_err, "failed to emit order.failed");
                }
                let _ = OrderLog::append(
                    &self.kernel.db,
                    order_id,
                    LogStage::Order,
                    LogLevel::Error,
                    &message,
                    None,
                )
                .await;
                warn!(order_id, error = %message, "order failed");
            }
        }

        if let Err(e) = self.kernel.leases.release_for_order(order_id).await {
            error!(order_id, error = %e, "failed to release order leases");
        }
    }
}
