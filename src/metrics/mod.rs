//! Prometheus metrics for the session engine
//!
//! This module tracks:
//! - Sessions: started, finished by outcome, currently active, duration
//! - Proxy pool: refills, discarded endpoints
//! - Breaker trips and collected items
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, or it is never called, metrics operations are no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct SessionMetrics {
    sessions_started: Counter,
    sessions_finished: CounterVec,
    active_sessions: Gauge,
    session_duration: Histogram,
    items_collected: Counter,
    extraction_failures: Counter,
    pool_refills: Counter,
    proxies_discarded: Counter,
    breaker_trips: Counter,
}

static SESSION_METRICS: OnceLock<SessionMetrics> = OnceLock::new();

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
/// if let Err(e) = stickyscrape::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SessionMetrics {
        sessions_started: register_counter!(
            "stickyscrape_sessions_started_total",
            "Total sessions started"
        )?,
        sessions_finished: register_counter_vec!(
            "stickyscrape_sessions_finished_total",
            "Total sessions finalized by outcome",
            &["outcome"]
        )?,
        active_sessions: register_gauge!(
            "stickyscrape_active_sessions",
            "Sessions currently between start and finalization"
        )?,
        session_duration: register_histogram!(
            "stickyscrape_session_duration_seconds",
            "Wall time of a session from start to finalization",
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        items_collected: register_counter!(
            "stickyscrape_items_collected_total",
            "Total items collected across sessions"
        )?,
        extraction_failures: register_counter!(
            "stickyscrape_extraction_failures_total",
            "Items dropped because no extraction strategy matched"
        )?,
        pool_refills: register_counter!(
            "stickyscrape_pool_refills_total",
            "Times the proxy pool reshuffled its recycled endpoints"
        )?,
        proxies_discarded: register_counter!(
            "stickyscrape_proxies_discarded_total",
            "Proxy endpoints permanently discarded"
        )?,
        breaker_trips: register_counter!(
            "stickyscrape_breaker_trips_total",
            "Rate-limit breaker trips"
        )?,
    };

    SESSION_METRICS
        .set(metrics)
        .map_err(|_| "Session metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SESSION_METRICS.get().is_some()
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

/// Record a session entering `Starting`
pub fn record_session_started() {
    if let Some(m) = SESSION_METRICS.get() {
        m.sessions_started.inc();
        m.active_sessions.inc();
    }
}

/// Record a session reaching `Finalized`
pub fn record_session_finished(outcome: &str, items: usize, failures: u32, secs: f64) {
    let Some(m) = SESSION_METRICS.get() else {
        return;
    };

    m.active_sessions.dec();
    m.sessions_finished.with_label_values(&[outcome]).inc();
    m.session_duration.observe(secs);

    if items > 0 {
        m.items_collected.inc_by(items as f64);
    }
    if failures > 0 {
        m.extraction_failures.inc_by(failures as f64);
    }
}

pub fn record_pool_refill() {
    if let Some(m) = SESSION_METRICS.get() {
        m.pool_refills.inc();
    }
}

pub fn record_proxy_discarded() {
    if let Some(m) = SESSION_METRICS.get() {
        m.proxies_discarded.inc();
    }
}

pub fn record_breaker_trip() {
    if let Some(m) = SESSION_METRICS.get() {
        m.breaker_trips.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
