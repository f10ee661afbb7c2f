//! Stream liveness and throughput accounting.

use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge};

/// Sink for the adapter's counters.
///
/// Injected at construction so embedders choose where the numbers go;
/// every method defaults to a no-op. Purely observational, never gates
/// stream behavior.
pub trait StreamMetrics: Send + Sync {
    /// A stream finished construction.
    fn stream_opened(&self) {}

    /// A stream was torn down.
    fn stream_disposed(&self) {}

    /// Plaintext bytes accepted by a write operation.
    fn egress_add(&self, _bytes: u64) {}

    /// Plaintext bytes delivered by a read operation.
    fn ingress_add(&self, _bytes: u64) {}

    /// An operation hit its deadline.
    fn timeout_inc(&self) {}
}

/// The default sink: counts nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl StreamMetrics for NoopMetrics {}

lazy_static! {
    static ref METRIC_STREAMS_ACTIVE: IntGauge = prometheus::register_int_gauge!(
        "sheath_streams_active",
        "TLS streams currently alive"
    )
    .unwrap();
    static ref METRIC_STREAMS_DISPOSED: IntCounter = prometheus::register_int_counter!(
        "sheath_streams_disposed_total",
        "TLS streams torn down since process start"
    )
    .unwrap();
    static ref METRIC_EGRESS_BYTES: IntCounter = prometheus::register_int_counter!(
        "sheath_stream_egress_bytes_total",
        "Plaintext bytes written through TLS streams"
    )
    .unwrap();
    static ref METRIC_INGRESS_BYTES: IntCounter = prometheus::register_int_counter!(
        "sheath_stream_ingress_bytes_total",
        "Plaintext bytes read through TLS streams"
    )
    .unwrap();
    static ref METRIC_TIMEOUTS: IntCounter = prometheus::register_int_counter!(
        "sheath_stream_timeouts_total",
        "Stream operations that hit their deadline"
    )
    .unwrap();
}

/// Process-wide sink backed by the default prometheus registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamCounters;

impl StreamCounters {
    pub fn global() -> Arc<Self> {
        Arc::new(StreamCounters)
    }
}

impl StreamMetrics for StreamCounters {
    fn stream_opened(&self) {
        METRIC_STREAMS_ACTIVE.inc();
    }

    fn stream_disposed(&self) {
        METRIC_STREAMS_ACTIVE.dec();
        METRIC_STREAMS_DISPOSED.inc();
    }

    fn egress_add(&self, bytes: u64) {
        METRIC_EGRESS_BYTES.inc_by(bytes);
    }

    fn ingress_add(&self, bytes: u64) {
        METRIC_INGRESS_BYTES.inc_by(bytes);
    }

    fn timeout_inc(&self) {
        METRIC_TIMEOUTS.inc();
    }
}
