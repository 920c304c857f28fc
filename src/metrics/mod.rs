/// Prometheus metrics for the policy gateway.
///
/// Counters and gauges cover the enforcement pipeline end to end:
/// request outcomes, policy blocks, DLP detections, provider calls and
/// fallbacks, usage recording, budget alerting, and bookkeeping
/// back-pressure.

use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Total gateway queries by outcome
    ///
    /// Labels: outcome (allowed, policy_blocked, budget_blocked, failed)
    pub static ref GATEWAY_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("gateway_requests_total", "Total gateway queries by outcome")
            .namespace("llm_policy_gateway"),
        &["outcome"]
    ).expect("Failed to create GATEWAY_REQUESTS_TOTAL metric");

    /// Policy blocks by phase
    ///
    /// Labels: phase (blocked_query, security_policy)
    pub static ref POLICY_BLOCKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("policy_blocks_total", "Requests blocked by policy")
            .namespace("llm_policy_gateway"),
        &["phase"]
    ).expect("Failed to create POLICY_BLOCKS_TOTAL metric");

    /// Alert actions fired by security policies
    pub static ref POLICY_ALERTS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("policy_alerts_total", "Alert actions fired by security policies")
            .namespace("llm_policy_gateway")
    ).expect("Failed to create POLICY_ALERTS_TOTAL metric");

    /// DLP detections by data type
    pub static ref DLP_DETECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("dlp_detections_total", "DLP detections by data type")
            .namespace("llm_policy_gateway"),
        &["data_type"]
    ).expect("Failed to create DLP_DETECTIONS_TOTAL metric");

    /// Provider call outcomes
    ///
    /// Labels: provider, outcome (success, error, unavailable)
    pub static ref PROVIDER_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("provider_requests_total", "Provider call outcomes")
            .namespace("llm_policy_gateway"),
        &["provider", "outcome"]
    ).expect("Failed to create PROVIDER_REQUESTS_TOTAL metric");

    /// Fallback-chain advances
    pub static ref PROVIDER_FALLBACKS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("provider_fallbacks_total", "Fallback-chain advances")
            .namespace("llm_policy_gateway")
    ).expect("Failed to create PROVIDER_FALLBACKS_TOTAL metric");

    /// Provider call duration in seconds
    pub static ref PROVIDER_CALL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "provider_call_duration_seconds",
            "Provider call duration in seconds"
        )
        .namespace("llm_policy_gateway")
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    ).expect("Failed to create PROVIDER_CALL_DURATION_SECONDS metric");

    /// Usage records persisted
    pub static ref USAGE_RECORDS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("usage_records_total", "Usage records persisted")
            .namespace("llm_policy_gateway")
    ).expect("Failed to create USAGE_RECORDS_TOTAL metric");

    /// Budget alerts emitted by type
    pub static ref BUDGET_ALERTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("budget_alerts_total", "Budget alerts emitted by type")
            .namespace("llm_policy_gateway"),
        &["alert_type"]
    ).expect("Failed to create BUDGET_ALERTS_TOTAL metric");

    /// Bookkeeping tasks currently queued
    pub static ref BOOKKEEPING_QUEUE_DEPTH: Gauge = Gauge::with_opts(
        Opts::new("bookkeeping_queue_depth", "Bookkeeping tasks currently queued")
            .namespace("llm_policy_gateway")
    ).expect("Failed to create BOOKKEEPING_QUEUE_DEPTH metric");

    /// Bookkeeping tasks rejected because the queue was full
    pub static ref BOOKKEEPING_DROPPED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("bookkeeping_dropped_total", "Bookkeeping tasks rejected on back-pressure")
            .namespace("llm_policy_gateway")
    ).expect("Failed to create BOOKKEEPING_DROPPED_TOTAL metric");
}

/// Register all metrics with the global registry.
/// Call once at startup; duplicate registration is an error.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(GATEWAY_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(POLICY_BLOCKS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(POLICY_ALERTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(DLP_DETECTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PROVIDER_FALLBACKS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PROVIDER_CALL_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(USAGE_RECORDS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BUDGET_ALERTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BOOKKEEPING_QUEUE_DEPTH.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BOOKKEEPING_DROPPED_TOTAL.clone()))?;
    Ok(())
}

/// Export all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
