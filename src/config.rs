//! Configuration module for the ingestion API.
//!
//! Loads and validates application configuration from environment variables,
//! with sensible defaults, the same `Config::from_env()`/`Config::validate()`
//! shape the teacher's own `src/config.rs` uses.

use ingestion::IngestionConfig;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ingestion: IngestionConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,

    /// Port to bind to (default: 3000)
    pub port: u16,

    /// Request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes (default: 100MB, large enough for
    /// a single chunk plus multipart framing overhead).
    pub max_body_size: usize,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret used to verify bearer tokens.
    pub jwt_secret: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (default: "info")
    pub level: String,

    /// Log format (default: "pretty"); valid values: "pretty", "json", "compact"
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ingestion: IngestionConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_secs: 30,
            max_body_size: 100 * 1024 * 1024,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: "dev-secret-change-me".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// - `SERVER_HOST`, `SERVER_PORT`, `SERVER_REQUEST_TIMEOUT_SECS`, `SERVER_MAX_BODY_SIZE`
    /// - `JWT_SECRET`
    /// - `LOG_LEVEL`, `LOG_FORMAT`
    /// - every `ingestion::IngestionConfig::from_env()` variable (`UPLOADS_PATH`, `CHUNK_SIZE`, ...)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("SERVER_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(timeout) = env::var("SERVER_REQUEST_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                config.server.request_timeout_secs = timeout;
            }
        }
        if let Ok(max_size) = env::var("SERVER_MAX_BODY_SIZE") {
            if let Ok(max_size) = max_size.parse() {
                config.server.max_body_size = max_size;
            }
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            config.logging.format = format;
        }

        config.ingestion = IngestionConfig::from_env();
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }
        if self.server.request_timeout_secs == 0 {
            return Err("Request timeout cannot be 0".to_string());
        }
        if self.server.max_body_size == 0 {
            return Err("Max body size cannot be 0".to_string());
        }
        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Valid values: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Valid values: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        self.ingestion.validate()?;
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_address_formats_host_and_port() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 8080;
        assert_eq!(config.server_address(), "127.0.0.1:8080");
    }
}
