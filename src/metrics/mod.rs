//! Prometheus metrics for producers, the drain loop and deliveries
//!
//! This module tracks:
//! - Producers: runs per slot and outcome, items enqueued, items skipped
//! - Drain loop: drains by outcome and duration, queue depth
//! - Delivery: sends per channel and status
//! - Storage: connection state
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops. Long-running
//! commands log a text snapshot through [`log_snapshot`] on shutdown.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

use crate::storage::ConnectionState;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Producer side metrics
struct ProducerMetrics {
    runs: CounterVec,
    enqueued: CounterVec,
    skipped_unchanged: CounterVec,
    filtered_out: CounterVec,
}

/// Drain and delivery metrics
struct ProcessorMetrics {
    drains: CounterVec,
    drain_duration: HistogramVec,
    deliveries: CounterVec,
    queue_depth: Gauge,
    connection_state: Gauge,
}

static PRODUCER_METRICS: OnceLock<ProducerMetrics> = OnceLock::new();

static PROCESSOR_METRICS: OnceLock<ProcessorMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// ```ignore
/// if let Err(e) = ratecast::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let producer = ProducerMetrics {
        runs: register_counter_vec!(
            "ratecast_producer_runs_total",
            "Producer runs by country, collection and outcome",
            &["country", "collection", "outcome"]
        )?,
        enqueued: register_counter_vec!(
            "ratecast_producer_enqueued_total",
            "Queue items enqueued by country and collection",
            &["country", "collection"]
        )?,
        skipped_unchanged: register_counter_vec!(
            "ratecast_producer_skipped_unchanged_total",
            "Items not enqueued because no rate changed",
            &["country", "collection"]
        )?,
        filtered_out: register_counter_vec!(
            "ratecast_producer_filtered_out_total",
            "Subscriptions dropped by their week availability",
            &["country", "collection"]
        )?,
    };

    let processor = ProcessorMetrics {
        drains: register_counter_vec!(
            "ratecast_drains_total",
            "Drain cycles by platform and outcome",
            &["platform", "outcome"]
        )?,
        drain_duration: register_histogram_vec!(
            "ratecast_drain_duration_seconds",
            "Time spent rendering and delivering one queue item",
            &["platform"],
            vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )?,
        deliveries: register_counter_vec!(
            "ratecast_deliveries_total",
            "Channel sends by channel and status",
            &["channel", "status"]
        )?,
        queue_depth: register_gauge!(
            "ratecast_queue_depth",
            "Items waiting in the processing queue"
        )?,
        connection_state: register_gauge!(
            "ratecast_store_connection_state",
            "Store connection state (0 disconnected, 1 connecting, 2 connected, 3 degraded)"
        )?,
    };

    PRODUCER_METRICS
        .set(producer)
        .map_err(|_| "Producer metrics already initialized")?;
    PROCESSOR_METRICS
        .set(processor)
        .map_err(|_| "Processor metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PRODUCER_METRICS.get().is_some() && PROCESSOR_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Log the current metrics in Prometheus text format
pub fn log_snapshot() {
    match encode_metrics() {
        Ok(text) => tracing::info!("Metrics at shutdown:\n{text}"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }
}

/// Record the counts of one finished producer run
pub fn record_producer_run(
    country: &str,
    collection: &str,
    outcome: &str,
    enqueued: usize,
    skipped_unchanged: usize,
    filtered_out: usize,
) {
    let Some(m) = PRODUCER_METRICS.get() else {
        return;
    };

    m.runs
        .with_label_values(&[country, collection, outcome])
        .inc();

    if enqueued > 0 {
        m.enqueued
            .with_label_values(&[country, collection])
            .inc_by(enqueued as f64);
    }
    if skipped_unchanged > 0 {
        m.skipped_unchanged
            .with_label_values(&[country, collection])
            .inc_by(skipped_unchanged as f64);
    }
    if filtered_out > 0 {
        m.filtered_out
            .with_label_values(&[country, collection])
            .inc_by(filtered_out as f64);
    }
}

/// Record one drain cycle
pub fn record_drain(platform: &str, outcome: &str, duration_secs: f64) {
    let Some(m) = PROCESSOR_METRICS.get() else {
        return;
    };

    m.drains.with_label_values(&[platform, outcome]).inc();
    m.drain_duration
        .with_label_values(&[platform])
        .observe(duration_secs);
}

/// Record one channel send
pub fn record_delivery(channel: &str, completed: bool) {
    if let Some(m) = PROCESSOR_METRICS.get() {
        let status = if completed { "completed" } else { "failed" };
        m.deliveries.with_label_values(&[channel, status]).inc();
    }
}

/// Update the queue depth gauge
pub fn set_queue_depth(depth: u64) {
    if let Some(m) = PROCESSOR_METRICS.get() {
        m.queue_depth.set(depth as f64);
    }
}

/// Update the connection state gauge
pub fn set_connection_state(state: ConnectionState) {
    let Some(m) = PROCESSOR_METRICS.get() else {
        return;
    };

    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Degraded => 3.0,
    };
    m.connection_state.set(value);
}

// ============================================================================
// Tests
// ============================================================================
