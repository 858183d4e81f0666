//! Observability demo service library.
//!
//! An HTTP service that exports Prometheus metrics, emits a periodic
//! telemetry sample in the background and ships structured log records to a
//! TCP log aggregator, with an ordered, deadline-bounded shutdown.

pub mod config;
pub mod emitter;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod shipping;

pub use config::ServiceConfig;
pub use lifecycle::{LifecycleCoordinator, RunningService, ShutdownReport};
pub use observability::MetricsRegistry;
pub use shipping::{LogRecord, LogSink};
