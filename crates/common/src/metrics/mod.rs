//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with latency histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all RagBridge metrics
pub const METRICS_PREFIX: &str = "ragbridge";

/// Histogram buckets for end-to-end query latency (in seconds).
/// Generation-bound queries routinely take multiple seconds.
pub const QUERY_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s
    30.00,  // 30s
    60.00,  // 60s
];

/// Buckets for individual backend calls (retrieval is fast, generation slow)
pub const BACKEND_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of queries handled"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_gauge!(
        format!("{}_sources_returned", METRICS_PREFIX),
        Unit::Count,
        "Number of deduplicated sources in the last response"
    );

    // Backend metrics
    describe_counter!(
        format!("{}_backend_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Total backend API calls"
    );

    describe_histogram!(
        format!("{}_backend_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Backend call latency in seconds"
    );

    // Streaming metrics
    describe_counter!(
        format!("{}_stream_frames_total", METRICS_PREFIX),
        Unit::Count,
        "Total streaming frames emitted"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record query metrics
pub fn record_query(mode: &str, outcome: &str, duration_secs: f64, source_count: usize) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_sources_returned", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .set(source_count as f64);
}

/// Helper to record backend call metrics
pub fn record_backend_call(operation: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_backend_calls_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_backend_call_duration_seconds", METRICS_PREFIX),
            "operation" => operation.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record one emitted streaming frame
pub fn record_stream_frame(kind: &str) {
    counter!(
        format!("{}_stream_frames_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(1);
}
