//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define service metrics (request counts, active users, order latency)
//! - Render the Prometheus text format for `GET /metrics`
//! - Accept `MetricSample`s from any producer without surfacing failures
//!
//! # Metrics
//! - `<ns>_http_request_count` (counter): requests by method, path, code
//! - `<ns>_active_users` (gauge): fed by the telemetry emitter
//! - `<ns>_order_processing_duration` (summary): order handler latency
//! - `<ns>_transaction_processing_time` (histogram): order handler latency
//! - `<ns>_background_jobs_total` (counter): job pool outcomes
//! - `<ns>_log_ship_failures_total` (counter): records that fell back to local logs
//!
//! # Design Decisions
//! - The recorder is owned by a cloneable handle, never installed globally
//! - Low-overhead metric updates (atomic operations inside the recorder)
//! - Invalid samples are dropped, not reported

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use metrics::{Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use thiserror::Error;

pub const HTTP_REQUEST_COUNT: &str = "http_request_count";
pub const ACTIVE_USERS: &str = "active_users";
pub const ORDER_PROCESSING_DURATION: &str = "order_processing_duration";
pub const TRANSACTION_PROCESSING_TIME: &str = "transaction_processing_time";
pub const BACKGROUND_JOBS_TOTAL: &str = "background_jobs_total";
pub const LOG_SHIP_FAILURES_TOTAL: &str = "log_ship_failures_total";

const SUMMARY_QUANTILES: &[f64] = &[0.5, 0.9, 0.99];
const TRANSACTION_BUCKETS: &[f64] = &[0.5, 1.0, 2.0];

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// How a sample updates its series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    CounterAdd,
    GaugeAdd,
    GaugeSet,
    Observe,
}

/// A single metric update produced by the emitter or a request handler.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub timestamp: SystemTime,
    pub kind: SampleKind,
}

impl MetricSample {
    pub fn new(kind: SampleKind, name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: HashMap::new(),
            value,
            timestamp: SystemTime::now(),
            kind,
        }
    }

    /// Increment a counter by one.
    pub fn counter(name: impl Into<String>) -> Self {
        Self::new(SampleKind::CounterAdd, name, 1.0)
    }

    pub fn gauge_add(name: impl Into<String>, value: f64) -> Self {
        Self::new(SampleKind::GaugeAdd, name, value)
    }

    pub fn observe(name: impl Into<String>, value: f64) -> Self {
        Self::new(SampleKind::Observe, name, value)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Destination of metric samples.
///
/// Implementations must be non-blocking and must never fail visibly.
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: &MetricSample);
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to build metrics recorder: {0}")]
    Build(#[from] BuildError),
}

/// Shared, internally synchronized metrics registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    namespace: String,
}

impl MetricsRegistry {
    /// Build a registry whose series are all prefixed with `namespace`.
    pub fn new(namespace: &str) -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_quantiles(SUMMARY_QUANTILES)?
            .set_buckets_for_metric(
                Matcher::Full(format!("{namespace}_{TRANSACTION_PROCESSING_TIME}")),
                TRANSACTION_BUCKETS,
            )?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            inner: Arc::new(RegistryInner {
                recorder,
                handle,
                namespace: namespace.to_string(),
            }),
        })
    }

    /// Render all series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    fn key(&self, sample: &MetricSample) -> Key {
        // Key identity depends on label order.
        let mut labels: Vec<Label> = sample
            .labels
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect();
        labels.sort_by(|a, b| a.key().cmp(b.key()));

        Key::from_parts(format!("{}_{}", self.inner.namespace, sample.name), labels)
    }
}

impl MetricsSink for MetricsRegistry {
    fn record(&self, sample: &MetricSample) {
        if !sample.value.is_finite() {
            tracing::trace!(metric = %sample.name, "Dropping non-finite sample");
            return;
        }

        let key = self.key(sample);
        let recorder = &self.inner.recorder;
        match sample.kind {
            SampleKind::CounterAdd => {
                if sample.value < 0.0 {
                    tracing::trace!(metric = %sample.name, "Dropping negative counter sample");
                    return;
                }
                recorder
                    .register_counter(&key, &METADATA)
                    .increment(sample.value as u64);
            }
            SampleKind::GaugeAdd => recorder
                .register_gauge(&key, &METADATA)
                .increment(sample.value),
            SampleKind::GaugeSet => recorder.register_gauge(&key, &METADATA).set(sample.value),
            SampleKind::Observe => recorder
                .register_histogram(&key, &METADATA)
                .record(sample.value),
        }
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("namespace", &self.inner.namespace)
            .finish()
    }
}

/// Count one handled request.
pub fn record_request(sink: &dyn MetricsSink, method: &str, path: &str, status: u16) {
    sink.record(
        &MetricSample::counter(HTTP_REQUEST_COUNT)
            .with_label("method", method)
            .with_label("path", path)
            .with_label("code", status.to_string()),
    );
}
