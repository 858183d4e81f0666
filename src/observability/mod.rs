//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (process-local structured log events)
//!     → metrics.rs (counters, gauges, summaries, histograms)
//!
//! Consumers:
//!     → stdout (local logs, JSON or pretty)
//!     → GET /metrics (Prometheus scrape)
//!     → shipping::LogSink for records bound to the aggregator
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics registry is an explicit handle passed to every producer
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use metrics::{MetricSample, MetricsRegistry, MetricsSink, SampleKind};
