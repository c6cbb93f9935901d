//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the session lifecycle, the resource cache,
//! data loads and chat turns, with standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all DataChat metrics
pub const METRICS_PREFIX: &str = "datachat";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for agent turns and resource builds (typically slower)
pub const AGENT_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Session metrics
    describe_counter!(
        format!("{}_sessions_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total sessions created"
    );

    describe_counter!(
        format!("{}_sessions_ended_total", METRICS_PREFIX),
        Unit::Count,
        "Total sessions ended, by reason"
    );

    describe_gauge!(
        format!("{}_sessions_active", METRICS_PREFIX),
        Unit::Count,
        "Number of live sessions"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    describe_counter!(
        format!("{}_resource_builds_total", METRICS_PREFIX),
        Unit::Count,
        "Total session resource builds, by outcome"
    );

    describe_histogram!(
        format!("{}_resource_build_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Session resource build latency in seconds"
    );

    // Data metrics
    describe_counter!(
        format!("{}_data_loads_total", METRICS_PREFIX),
        Unit::Count,
        "Total tenant data loads, by source and outcome"
    );

    // Chat metrics
    describe_counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat turns, by outcome"
    );

    describe_histogram!(
        format!("{}_chat_turn_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Chat turn latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_session_created() {
    counter!(format!("{}_sessions_created_total", METRICS_PREFIX)).increment(1);
}

pub fn record_session_ended(reason: &str) {
    counter!(
        format!("{}_sessions_ended_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!(format!("{}_sessions_active", METRICS_PREFIX)).set(count as f64);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

pub fn record_build(outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_resource_builds_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_resource_build_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

pub fn record_data_load(source: &str, outcome: &str) {
    counter!(
        format!("{}_data_loads_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_chat_turn(outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_chat_turn_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}
