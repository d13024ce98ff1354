//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML config
//! files; every section and field has a working default.

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Connection timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Connection timeout configuration. A value of 0 disables the
/// respective timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Soft timeout in milliseconds: maximum time a connection may sit
    /// waiting for a request's header section.
    pub soft_ms: u64,

    /// Hard timeout in milliseconds: absolute cap on a connection's
    /// lifetime.
    pub hard_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            soft_ms: 2_500,
            hard_ms: 25_000,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.timeouts.soft_ms, 2_500);
        assert_eq!(config.timeouts.hard_ms, 25_000);
        assert_eq!(config.listener.max_connections, 10_000);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "0.0.0.0:9000"

            [timeouts]
            soft_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.listener.max_connections, 10_000);
        assert_eq!(config.timeouts.soft_ms, 500);
        assert_eq!(config.timeouts.hard_ms, 25_000);
    }
}
