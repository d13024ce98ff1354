//! Configuration validation.
//!
//! Serde handles the syntactic side; this module checks semantics and
//! reports all violations, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// One semantic violation in a configuration.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a valid socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("limits.max_body_bytes must be greater than zero")]
    MaxBodyBytes,

    #[error("timeouts.soft_ms ({soft}) must not exceed timeouts.hard_ms ({hard})")]
    TimeoutOrder { soft: u64, hard: u64 },

    #[error("logging.level '{0}' is not one of trace, debug, info, warn, error")]
    LogLevel(String),
}

/// Validate a configuration, returning every violation found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::MaxBodyBytes);
    }
    let (soft, hard) = (config.timeouts.soft_ms, config.timeouts.hard_ms);
    if soft > 0 && hard > 0 && soft > hard {
        errors.push(ValidationError::TimeoutOrder { soft, hard });
    }
    if !matches!(
        config.logging.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::LogLevel(config.logging.level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
