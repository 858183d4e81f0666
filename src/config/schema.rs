//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the demo service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener configuration.
    pub listener: ListenerConfig,

    /// Outbound log shipping channel.
    pub log_sink: LogSinkConfig,

    /// Background telemetry emitter.
    pub emitter: EmitterConfig,

    /// Shutdown sequencing.
    pub shutdown: ShutdownConfig,

    /// Simulated order handling.
    pub orders: OrdersConfig,

    /// Bounded background job pool.
    pub jobs: JobsConfig,

    /// Local logging and metrics naming.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:1000").
    pub bind_address: String,

    /// Maximum requests processed concurrently (backpressure).
    pub max_concurrent_requests: usize,

    /// Upper bound on a single request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1000".to_string(),
            max_concurrent_requests: 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Log shipping configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSinkConfig {
    /// Aggregator endpoint as `host:port`.
    pub address: String,

    /// Maximum time to establish the connection at startup.
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// Upper bound on shipping one record, lock wait included.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Fields attached to every shipped record.
    pub fields: BTreeMap<String, String>,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            address: "logstash:5000".to_string(),
            dial_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(1),
            fields: BTreeMap::from([("environment".to_string(), "dev".to_string())]),
        }
    }
}

/// Telemetry emitter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Time between two samples.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// `country_id` label of the active users gauge.
    pub country_id: String,

    /// `city_id` label of the active users gauge.
    pub city_id: String,

    /// Exclusive upper bound of the random gauge increment.
    pub max_increment: u32,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            country_id: "ID".to_string(),
            city_id: "JAK".to_string(),
            max_increment: 100,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period given to in-flight requests before a forced close.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
        }
    }
}

/// Simulated latencies of `POST /orders`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrdersConfig {
    #[serde(with = "humantime_serde")]
    pub success_latency: Duration,

    #[serde(with = "humantime_serde")]
    pub failure_latency: Duration,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            success_latency: Duration::from_millis(100),
            failure_latency: Duration::from_millis(1300),
        }
    }
}

/// Background job pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Maximum jobs running at once; further submissions are rejected.
    pub max_concurrent: usize,

    /// Simulated duration of each validation step.
    #[serde(with = "humantime_serde")]
    pub step_latency: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            step_latency: Duration::from_millis(50),
        }
    }
}

/// Output format of process-local logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Local log output format.
    pub log_format: LogFormat,

    /// Prefix of every exported metric name.
    pub namespace: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            namespace: "demo_app".to_string(),
        }
    }
}
