//! Configuration for Ldapsync
//!
//! This is the service configuration (database, logging, directory client
//! tuning, scheduler cadence). The directory configuration itself is a
//! stored record, see [`crate::types::DirectoryConfig`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub directory: DirectoryClientConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl ServiceConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Internal(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Validation(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LDAPSYNC_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(level) = std::env::var("LDAPSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("LDAPSYNC_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(secs) = std::env::var("LDAPSYNC_CONNECT_TIMEOUT") {
            if let Ok(s) = secs.parse() {
                config.directory.connect_timeout_secs = s;
            }
        }
        if let Ok(secs) = std::env::var("LDAPSYNC_OPERATION_TIMEOUT") {
            if let Ok(s) = secs.parse() {
                config.directory.operation_timeout_secs = s;
            }
        }
        if let Ok(size) = std::env::var("LDAPSYNC_POOL_SIZE") {
            if let Ok(s) = size.parse() {
                config.directory.pool_size = s;
            }
        }
        if std::env::var("LDAPSYNC_STARTTLS").map(|v| v == "true").unwrap_or(false) {
            config.directory.starttls = true;
        }
        if std::env::var("LDAPSYNC_SKIP_TLS_VERIFY").map(|v| v == "true").unwrap_or(false) {
            config.directory.skip_tls_verify = true;
        }
        if let Ok(secs) = std::env::var("LDAPSYNC_POLL_INTERVAL") {
            if let Ok(s) = secs.parse() {
                config.scheduler.poll_interval_secs = s;
            }
        }

        config
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.database.url.is_empty() {
            return Err(crate::Error::Validation("database.url is required".into()));
        }
        if self.database.max_connections == 0 {
            return Err(crate::Error::Validation(
                "database.max_connections must be at least 1".into(),
            ));
        }
        self.directory.validate()?;
        if self.scheduler.poll_interval_secs == 0 {
            return Err(crate::Error::Validation(
                "scheduler.poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://ldapsync.db?mode=rwc".to_string(),
            max_connections: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Directory client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryClientConfig {
    /// TCP/TLS connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout applied to every bind, search and ping
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Maximum number of directory connections open at once
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a caller waits for a free connection slot
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Upgrade plain connections with STARTTLS
    #[serde(default)]
    pub starttls: bool,

    /// Skip TLS certificate verification (not recommended for production)
    #[serde(default)]
    pub skip_tls_verify: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_pool_size() -> usize {
    8
}

fn default_acquire_timeout() -> u64 {
    5
}

impl Default for DirectoryClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            pool_size: default_pool_size(),
            acquire_timeout_secs: default_acquire_timeout(),
            starttls: false,
            skip_tls_verify: false,
        }
    }
}

impl DirectoryClientConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.pool_size == 0 {
            return Err(crate::Error::Validation(
                "directory.pool_size must be at least 1".into(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(crate::Error::Validation(
                "directory timeouts must be at least 1 second".into(),
            ));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(crate::Error::Validation(
                "directory.acquire_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Background sync cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the loop re-reads the active configuration
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound of the delay after consecutive failed passes
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [database]
            url = "sqlite::memory:"
            max_connections = 1

            [directory]
            pool_size = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.directory.pool_size, 2);
        assert_eq!(config.directory.operation_timeout_secs, 30);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = ServiceConfig::default();
        config.directory.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
