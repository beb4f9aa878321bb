//! Prometheus metrics
//!
//! Registered once in the default registry; `/metrics` renders them.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, TextEncoder};
use std::sync::OnceLock;
use tracing::warn;

struct StreamMetrics {
    frames_received: IntCounter,
    frames_rejected: IntCounter,
    updates_processed: IntCounterVec,
    latency_seconds: Gauge,
}

impl StreamMetrics {
    fn register() -> prometheus::Result<Self> {
        let metrics = Self {
            frames_received: IntCounter::new("stream_frames_received_total", "Frames read from the socket")?,
            frames_rejected: IntCounter::new(
                "stream_frames_rejected_total",
                "Frames that could not be parsed",
            )?,
            updates_processed: IntCounterVec::new(
                Opts::new("stream_updates_processed_total", "Change entries applied to caches"),
                &["kind"],
            )?,
            latency_seconds: Gauge::new(
                "stream_latency_seconds",
                "Wall clock minus publish time of the last update",
            )?,
        };

        let registry = prometheus::default_registry();
        registry.register(Box::new(metrics.frames_received.clone()))?;
        registry.register(Box::new(metrics.frames_rejected.clone()))?;
        registry.register(Box::new(metrics.updates_processed.clone()))?;
        registry.register(Box::new(metrics.latency_seconds.clone()))?;
        Ok(metrics)
    }
}

static METRICS: OnceLock<Option<StreamMetrics>> = OnceLock::new();

fn metrics() -> Option<&'static StreamMetrics> {
    METRICS
        .get_or_init(|| match StreamMetrics::register() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, "Failed to register metrics");
                None
            }
        })
        .as_ref()
}

pub fn frame_received() {
    if let Some(m) = metrics() {
        m.frames_received.inc();
    }
}

pub fn frame_rejected() {
    if let Some(m) = metrics() {
        m.frames_rejected.inc();
    }
}

pub fn updates_processed(kind: &str, count: usize) {
    if let Some(m) = metrics() {
        m.updates_processed.with_label_values(&[kind]).inc_by(count as u64);
    }
}

pub fn latency(seconds: f64) {
    if let Some(m) = metrics() {
        m.latency_seconds.set(seconds);
    }
}

/// Render the default registry in the text exposition format
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}
