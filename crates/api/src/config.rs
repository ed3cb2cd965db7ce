//! Application configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use collabsphere_shared::RateLimitConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub shutdown_grace_secs: u64,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Logging
    pub log_level: String,
    pub log_format: String,

    // Hub
    pub outbound_queue_capacity: usize,
    pub hub_queue_capacity: usize,
    pub history_limit: i64,
    pub whiteboard_max_events: usize,
    pub whiteboard_flush_interval_secs: u64,

    // Inbound rate limiting
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_max_strikes: u32,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            shutdown_grace_secs: parse_or("SHUTDOWN_GRACE_SECS", 10),

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: parse_or("JWT_EXPIRY_HOURS", 24),

            // Logging
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),

            // Hub
            outbound_queue_capacity: parse_or("OUTBOUND_QUEUE_CAPACITY", 256),
            hub_queue_capacity: parse_or("HUB_QUEUE_CAPACITY", 1024),
            history_limit: parse_or("HISTORY_LIMIT", 50),
            whiteboard_max_events: parse_or("WHITEBOARD_MAX_EVENTS", 10_000),
            whiteboard_flush_interval_secs: parse_or("WHITEBOARD_FLUSH_INTERVAL_SECS", 60),

            // Rate limiting
            rate_limit_per_second: parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst: parse_or("RATE_LIMIT_BURST", 20),
            rate_limit_max_strikes: parse_or("RATE_LIMIT_MAX_STRIKES", 50),
        };

        if config.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "OUTBOUND_QUEUE_CAPACITY must be greater than zero",
            ));
        }
        if config.hub_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "HUB_QUEUE_CAPACITY must be greater than zero",
            ));
        }
        if config.whiteboard_flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "WHITEBOARD_FLUSH_INTERVAL_SECS must be greater than zero",
            ));
        }

        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Defaults with a fixed secret, for tests that need a full config
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            shutdown_grace_secs: 1,
            database_url: None,
            database_max_connections: 1,
            jwt_secret: "test-jwt-secret-must-be-at-least-32-characters-long".to_string(),
            jwt_expiry_hours: 1,
            log_level: "debug".to_string(),
            log_format: "pretty".to_string(),
            outbound_queue_capacity: 64,
            hub_queue_capacity: 64,
            history_limit: 50,
            whiteboard_max_events: 1_000,
            whiteboard_flush_interval_secs: 60,
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            rate_limit_max_strikes: 50,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            per_second: self.rate_limit_per_second,
            burst: self.rate_limit_burst,
            max_strikes: self.rate_limit_max_strikes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
