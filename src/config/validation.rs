//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, non-empty names)
//! - Detect conflicting inbound ports
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FleetConfig → Result<(), Vec<ValidationError>>
//! - Unknown strategy names are not errors; they resolve to the default

use std::collections::HashMap;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::FleetConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("inbounds {first} and {second} share port {port}")]
    PortConflict {
        first: &'static str,
        second: &'static str,
        port: u16,
    },

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("unknown log format {0:?} (expected pretty or json)")]
    LogFormat(String),
}

pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "health_check.interval_secs" });
    }
    if config.daemon.apply_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "daemon.apply_interval_secs" });
    }
    if config.daemon.reload_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "daemon.reload_timeout_secs" });
    }
    if config.store.max_configs == 0 {
        errors.push(ValidationError::Zero { field: "store.max_configs" });
    }
    if config.daemon.service_name.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "daemon.service_name" });
    }
    if config.daemon.config_path.as_os_str().is_empty() {
        errors.push(ValidationError::Empty { field: "daemon.config_path" });
    }

    let mut seen: HashMap<u16, &'static str> = HashMap::new();
    for (name, port) in config.synthesis.inbound_ports() {
        if let Some(first) = seen.insert(port, name) {
            errors.push(ValidationError::PortConflict { first, second: name, port });
        }
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(obs.metrics_address.clone()));
    }
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(obs.log_format.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&FleetConfig::default()).is_ok());
    }

    #[test]
    fn test_port_conflict() {
        let mut config = FleetConfig::default();
        config.synthesis.socks_port = config.synthesis.vmess_port;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::PortConflict { first: "vmess", second: "socks", port: 443 }]
        );
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = FleetConfig::default();
        config.daemon.apply_interval_secs = 0;
        config.observability.metrics_address = "not an address".to_string();
        config.observability.log_format = "xml".to_string();
        config.load_balancer.strategy = "fastest".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::LogFormat("xml".to_string())));
    }

    #[test]
    fn test_config_history_must_keep_something() {
        let mut config = FleetConfig::default();
        config.store.max_configs = 0;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::Zero { field: "store.max_configs" }]
        );
    }

    #[test]
    fn test_metrics_address_ignored_when_disabled() {
        let mut config = FleetConfig::default();
        config.observability.metrics_enabled = false;
        config.observability.metrics_address = String::new();
        assert!(validate_config(&config).is_ok());
    }
}
