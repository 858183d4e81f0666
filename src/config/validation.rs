//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, durations and limits
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("log_sink.address `{0}` must be host:port")]
    SinkAddress(String),

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("observability.namespace `{0}` must be non-empty [a-zA-Z0-9_]")]
    Namespace(String),
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if !is_host_port(&config.log_sink.address) {
        errors.push(ValidationError::SinkAddress(config.log_sink.address.clone()));
    }

    let durations: [(&'static str, Duration); 7] = [
        ("listener.request_timeout", config.listener.request_timeout),
        ("log_sink.dial_timeout", config.log_sink.dial_timeout),
        ("log_sink.write_timeout", config.log_sink.write_timeout),
        ("emitter.interval", config.emitter.interval),
        ("shutdown.deadline", config.shutdown.deadline),
        ("orders.failure_latency", config.orders.failure_latency),
        ("jobs.step_latency", config.jobs.step_latency),
    ];
    for (field, value) in durations {
        if value.is_zero() {
            errors.push(ValidationError::NotPositive(field));
        }
    }

    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::NotPositive("listener.max_concurrent_requests"));
    }
    if config.jobs.max_concurrent == 0 {
        errors.push(ValidationError::NotPositive("jobs.max_concurrent"));
    }
    if config.emitter.max_increment == 0 {
        errors.push(ValidationError::NotPositive("emitter.max_increment"));
    }

    let namespace = &config.observability.namespace;
    if namespace.is_empty() || !namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        errors.push(ValidationError::Namespace(namespace.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServiceConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServiceConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.log_sink.address = "logstash".into();
        config.shutdown.deadline = Duration::ZERO;
        config.observability.namespace = "demo-app".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NotPositive("shutdown.deadline")));
        assert!(errors.contains(&ValidationError::SinkAddress("logstash".into())));
    }

    #[test]
    fn sink_address_accepts_hostnames() {
        assert!(is_host_port("logstash:5000"));
        assert!(is_host_port("127.0.0.1:5000"));
        assert!(!is_host_port(":5000"));
        assert!(!is_host_port("logstash:http"));
    }
}
