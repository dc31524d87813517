//! Application setup and router assembly.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerKernel;

use super::routes::{health, mail, orders, query, stream};

pub fn build_app(kernel: Arc<ServerKernel>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/query", post(query::submit_query_handler))
        .route("/api/orders", post(orders::create_order_handler))
        .route("/api/orders", get(orders::list_orders_handler))
        .route("/api/orders/availability", get(orders::availability_handler))
        .route("/api/orders/stats", get(orders::run_stats_handler))
        .route("/api/orders/:id", get(orders::get_order_handler))
        .route("/api/orders/:id/logs", get(orders::order_logs_handler))
        .route("/api/orders/:id/cancel", post(orders::cancel_order_handler))
        .route("/api/orders/:id/stream", get(stream::order_stream_handler))
        .route("/api/mail/thread", post(mail::create_thread_handler))
        .route("/api/mail/threads", get(mail::list_threads_handler))
        .route("/api/mail/thread/:uid", get(mail::get_thread_handler))
        .route("/api/mail/thread/:uid/reply", post(mail::append_reply_handler))
        .route("/api/mail/thread/:uid/read", post(mail::mark_read_handler))
        .route("/api/mail/thread/:uid/stream", get(stream::mail_stream_handler))
        .route("/api/mail/attachments/:id", get(mail::attachment_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(kernel)
}
