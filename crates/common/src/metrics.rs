//! Metrics collection for the TFACC client
//!
//! This module provides Prometheus metrics for observability.
//! Counters on the signaling path are plain atomics, so recording them does
//! not disturb the spin loop.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for the TFACC client
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub channel: ChannelMetrics,
    pub registry_ops: RegistryMetrics,
    pub linear: LinearMetrics,
}

/// Signaling and transfer metrics
#[derive(Debug, Clone)]
pub struct ChannelMetrics {
    /// Operations posted to the partitions
    pub launches_total: IntCounter,

    /// Time spent polling flags until every partition is idle
    pub wait_duration: Histogram,

    /// Waits that gave up on a deadline
    pub wait_timeouts_total: IntCounter,

    /// Payload bytes sent through the long message transport
    pub long_message_bytes_total: IntCounter,

    /// Chunks sent through the long message transport
    pub long_message_chunks_total: IntCounter,

    /// Complete long messages sent
    pub long_messages_total: IntCounter,
}

/// Tensor registry metrics
#[derive(Debug, Clone)]
pub struct RegistryMetrics {
    /// Registration messages sent
    pub registrations_total: IntCounter,

    /// Unregistration messages sent
    pub unregistrations_total: IntCounter,

    /// Tensors currently resident on the accelerator
    pub resident_tensors: IntGauge,
}

/// Quantized linear invoker metrics
#[derive(Debug, Clone)]
pub struct LinearMetrics {
    /// Linear invocations with at least one row
    pub calls_total: IntCounter,

    /// Sub-batches launched
    pub sub_batches_total: IntCounter,

    /// Input rows processed
    pub rows_total: IntCounter,

    /// Duration of a whole linear invocation
    pub call_duration: Histogram,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric name and help are valid")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::new(name, help).expect("metric name and help are valid")
}

fn histogram(name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("histogram options are valid")
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Channel metrics
        let launches_total = counter(
            "tfacc_launches_total",
            "Total number of operations posted to the accelerator",
        );

        let wait_duration = histogram(
            "tfacc_wait_duration_seconds",
            "Time spent polling partition flags",
            vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
        );

        let wait_timeouts_total = counter(
            "tfacc_wait_timeouts_total",
            "Total number of waits that exceeded their deadline",
        );

        let long_message_bytes_total = counter(
            "tfacc_long_message_bytes_total",
            "Total payload bytes sent as long messages",
        );

        let long_message_chunks_total = counter(
            "tfacc_long_message_chunks_total",
            "Total chunks sent as long messages",
        );

        let long_messages_total = counter(
            "tfacc_long_messages_total",
            "Total complete long messages sent",
        );

        // Registry metrics
        let registrations_total = counter(
            "tfacc_registrations_total",
            "Total tensor registration messages sent",
        );

        let unregistrations_total = counter(
            "tfacc_unregistrations_total",
            "Total tensor unregistration messages sent",
        );

        let resident_tensors = gauge(
            "tfacc_resident_tensors",
            "Current number of tensors resident on the accelerator",
        );

        // Linear metrics
        let calls_total = counter(
            "tfacc_linear_calls_total",
            "Total quantized linear invocations",
        );

        let sub_batches_total = counter(
            "tfacc_linear_sub_batches_total",
            "Total quantized linear sub-batches launched",
        );

        let rows_total = counter(
            "tfacc_linear_rows_total",
            "Total input rows sent to quantized linear",
        );

        let call_duration = histogram(
            "tfacc_linear_call_duration_seconds",
            "Quantized linear invocation duration in seconds",
            vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5],
        );

        // Register all metrics
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(launches_total.clone()),
            Box::new(wait_duration.clone()),
            Box::new(wait_timeouts_total.clone()),
            Box::new(long_message_bytes_total.clone()),
            Box::new(long_message_chunks_total.clone()),
            Box::new(long_messages_total.clone()),
            Box::new(registrations_total.clone()),
            Box::new(unregistrations_total.clone()),
            Box::new(resident_tensors.clone()),
            Box::new(calls_total.clone()),
            Box::new(sub_batches_total.clone()),
            Box::new(rows_total.clone()),
            Box::new(call_duration.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        let channel = ChannelMetrics {
            launches_total,
            wait_duration,
            wait_timeouts_total,
            long_message_bytes_total,
            long_message_chunks_total,
            long_messages_total,
        };

        let registry_ops = RegistryMetrics {
            registrations_total,
            unregistrations_total,
            resident_tensors,
        };

        let linear = LinearMetrics {
            calls_total,
            sub_batches_total,
            rows_total,
            call_duration,
        };

        MetricsRegistry {
            registry,
            channel,
            registry_ops,
            linear,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}
