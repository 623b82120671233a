//! Prometheus metrics for the cask server.
//!
//! Exposes counters for admission decisions, block staging and session
//! outcomes, plus commit and stage latency histograms.
//!
//! The `/metrics` endpoint is unauthenticated. Object names never appear in
//! labels, but aggregate traffic does, so restrict it to scrapers at the
//! network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Admission metrics
pub static UPLOAD_SESSIONS_ADMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_upload_sessions_admitted_total",
        "Total number of upload sessions admitted",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_REJECTED_BUSY: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_upload_sessions_rejected_busy_total",
        "Total number of upload requests rejected because a session was active",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_RATE_LIMITED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_upload_sessions_rate_limited_total",
        "Total number of upload requests rejected by the rate limiter",
    )
    .expect("metric creation failed")
});

// Session outcome metrics
pub static UPLOAD_SESSIONS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_upload_sessions_committed_total",
        "Total number of upload sessions successfully committed",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_upload_sessions_failed_total",
        "Total number of upload sessions that ended in failure",
    )
    .expect("metric creation failed")
});

// Block metrics
pub static BLOCKS_STAGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("cask_blocks_staged_total", "Total number of blocks staged")
        .expect("metric creation failed")
});

pub static BYTES_STAGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("cask_bytes_staged_total", "Total bytes staged")
        .expect("metric creation failed")
});

pub static BLOCK_STAGE_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_block_stage_retries_total",
        "Total number of block stage attempts retried after a transient failure",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static UPLOAD_COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "cask_upload_commit_duration_seconds",
            "Time taken to commit a block list",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static BLOCK_STAGE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "cask_block_stage_duration_seconds",
            "Time taken to stage a single block, retries included",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("cask_upload_errors_total", "Total upload errors by error type"),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Current state gauges
pub static ACTIVE_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "cask_active_upload_sessions",
        "Current number of active upload sessions (0 or 1)",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_ADMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_REJECTED_BUSY.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_RATE_LIMITED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_COMMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOCKS_STAGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STAGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOCK_STAGE_RETRIES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_COMMIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOCK_STAGE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_UPLOAD_SESSIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
