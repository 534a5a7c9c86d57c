//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! This module provides:
//! - A `/metrics` endpoint that returns Prometheus-formatted metrics
//! - Middleware for tracking HTTP request counts and durations
//! - Helpers to record bill payments and notification outcomes

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::db::{NotificationChannel, NotificationStatus};
use crate::AppState;

// Metric names as constants for consistency
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const BILLS_PAID_TOTAL: &str = "bills_paid_total";
pub const NOTIFICATIONS_TOTAL: &str = "notifications_total";
pub const USERS_TOTAL: &str = "users_total";
pub const HOUSEHOLDS_TOTAL: &str = "households_total";
pub const BILLS_OPEN: &str = "bills_open";

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Fails if a recorder is already installed; call once at startup.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(BILLS_PAID_TOTAL, "Total number of bills marked as paid");
    describe_counter!(
        NOTIFICATIONS_TOTAL,
        "Notification delivery attempts by channel and status"
    );
    describe_gauge!(USERS_TOTAL, "Number of registered users");
    describe_gauge!(HOUSEHOLDS_TOTAL, "Number of households");
    describe_gauge!(BILLS_OPEN, "Number of pending or overdue bills");

    Ok(handle)
}

/// GET /metrics - Returns Prometheus-formatted metrics.
///
/// This endpoint is accessible without authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    let queries = [
        (USERS_TOTAL, "SELECT COUNT(*) FROM users"),
        (HOUSEHOLDS_TOTAL, "SELECT COUNT(*) FROM households"),
        (
            BILLS_OPEN,
            "SELECT COUNT(*) FROM bills WHERE status IN ('pending', 'overdue')",
        ),
    ];
    for (name, sql) in queries {
        match sqlx::query_scalar::<_, i64>(sql).fetch_one(&state.db).await {
            Ok(count) => gauge!(name).set(count as f64),
            Err(e) => tracing::warn!(metric = name, error = %e, "Failed to refresh gauge"),
        }
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Matched path keeps ids out of the label set
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_bill_paid(recurring: bool) {
    let kind = if recurring { "recurring" } else { "one_off" };
    counter!(BILLS_PAID_TOTAL, "kind" => kind).increment(1);
}

pub fn record_notification(channel: NotificationChannel, status: NotificationStatus) {
    counter!(
        NOTIFICATIONS_TOTAL,
        "channel" => channel.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}
