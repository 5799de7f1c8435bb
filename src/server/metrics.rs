use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all event queue metrics
const PREFIX: &str = "pezzottify_events";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Emitter Metrics
    pub static ref EVENTS_EMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_emitted_total"), "Total number of emitted events"),
        &["event_type"]
    ).expect("Failed to create emitted_total metric");

    // Worker Metrics
    pub static ref DISPATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_dispatches_total"), "Total handler dispatches by outcome"),
        &["event_type", "outcome"]
    ).expect("Failed to create dispatches_total metric");

    pub static ref DISPATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_dispatch_duration_seconds"),
            "Handler dispatch duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        &["event_type"]
    ).expect("Failed to create dispatch_duration_seconds metric");

    pub static ref IN_FLIGHT_DISPATCHES: IntGauge = IntGauge::new(
        format!("{PREFIX}_in_flight_dispatches"),
        "Number of handler dispatches currently running"
    ).expect("Failed to create in_flight_dispatches metric");

    pub static ref CLAIMED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_claimed_total"),
        "Total number of records claimed by poll cycles"
    ).expect("Failed to create claimed_total metric");

    pub static ref STALE_RECOVERED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_stale_recovered_total"),
        "Records returned to PENDING after being stuck in PROCESSING"
    ).expect("Failed to create stale_recovered_total metric");

    pub static ref STORE_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_store_errors_total"), "Store errors seen by the worker"),
        &["operation"]
    ).expect("Failed to create store_errors_total metric");

    // Queue depth, refreshed on scrape
    pub static ref RECORDS_BY_STATUS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_records"), "Number of event records by status"),
        &["status"]
    ).expect("Failed to create records metric");
}

pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(EVENTS_EMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DISPATCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DISPATCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(IN_FLIGHT_DISPATCHES.clone()));
    let _ = REGISTRY.register(Box::new(CLAIMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STALE_RECOVERED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STORE_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECORDS_BY_STATUS.clone()));
}

/// Record an emitted event
pub fn record_event_emitted(event_type: &str) {
    EVENTS_EMITTED_TOTAL.with_label_values(&[event_type]).inc();
}

/// Record a finished dispatch. `outcome` is completed, retry or failed.
pub fn record_dispatch(event_type: &str, outcome: &str, duration: Duration) {
    DISPATCHES_TOTAL
        .with_label_values(&[event_type, outcome])
        .inc();

    DISPATCH_DURATION_SECONDS
        .with_label_values(&[event_type])
        .observe(duration.as_secs_f64());
}

pub fn dispatch_started() {
    IN_FLIGHT_DISPATCHES.inc();
}

pub fn dispatch_finished() {
    IN_FLIGHT_DISPATCHES.dec();
}

/// Record the number of records claimed in one cycle
pub fn record_claimed(count: usize) {
    CLAIMED_TOTAL.inc_by(count as u64);
}

pub fn record_stale_recovered(count: usize) {
    STALE_RECOVERED_TOTAL.inc_by(count as u64);
}

/// Record a store error inside the worker loop
pub fn record_store_error(operation: &str) {
    STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

/// Update the per-status record gauges
pub fn set_records_by_status(status: &str, count: u64) {
    RECORDS_BY_STATUS
        .with_label_values(&[status])
        .set(count as f64);
}

/// Render the registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("Failed to encode metrics"),
            )
        }
    }
}
