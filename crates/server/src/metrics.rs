//! Prometheus metrics for the freight server.
//!
//! Exposes request, upload lifecycle, and error counters. The `/metrics`
//! endpoint is unauthenticated to allow Prometheus scraping and must be
//! network-restricted at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "freight_requests_total",
            "Total number of requests by HTTP method",
        ),
        &["method"],
    )
    .expect("metric creation failed")
});

pub static UPLOADS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "freight_uploads_created_total",
        "Total number of uploads created",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_FINISHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "freight_uploads_finished_total",
        "Total number of uploads fully completed",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_TERMINATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "freight_uploads_terminated_total",
        "Total number of uploads terminated",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "freight_bytes_received_total",
        "Total upload body bytes durably accepted",
    )
    .expect("metric creation failed")
});

pub static ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "freight_errors_total",
            "Total number of protocol errors by code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Idempotent, so it is safe
/// to call from tests that build multiple routers.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS_TOTAL.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_FINISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_TERMINATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }

    (
        [(
            axum::http::header::CONTENT_TYPE,
            encoder.format_type().to_string(),
        )],
        buffer,
    )
        .into_response()
}
