//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub jobs: JobsConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for a served federation domain
    ///
    /// # Returns
    /// Full URL like "https://badges.example.com"
    pub fn base_url(&self, domain: &str) -> String {
        format!("{}://{}", self.protocol, domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation configuration
///
/// One process may serve several issuing domains; each domain has its own
/// identities and its own slice of the job queue.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Served federation domains
    pub domains: Vec<DomainConfig>,
    /// RSA key size for generated actor keypairs
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
}

/// A single served federation domain
#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    /// Domain name (e.g., "badges.example.com")
    pub domain: String,
    /// Username of the domain's default issuing identity
    #[serde(default = "default_actor_username")]
    pub default_actor: String,
    /// Username of the relay identity used for boosts
    /// (falls back to default_actor if not set)
    pub relay_actor: Option<String>,
}

impl DomainConfig {
    /// Username of the relay identity for this domain.
    pub fn relay_actor(&self) -> &str {
        self.relay_actor.as_deref().unwrap_or(&self.default_actor)
    }
}

impl FederationConfig {
    /// Find the configuration for a served domain.
    pub fn domain(&self, domain: &str) -> Option<&DomainConfig> {
        self.domains
            .iter()
            .find(|d| d.domain.eq_ignore_ascii_case(domain))
    }
}

fn default_key_bits() -> usize {
    2048
}

fn default_actor_username() -> String {
    "badges".to_string()
}

/// Job pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Seconds between polling cycles (default: 60)
    pub poll_interval_seconds: u64,
    /// Maximum jobs claimed per domain per cycle (default: 5)
    pub batch_size: u32,
    /// Retry ceiling for transient job failures (default: 5)
    pub max_retries: i64,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Remote actor cache TTL in seconds (default: 3600)
    pub actor_ttl: u64,
    /// Maximum entries in the remote actor cache (default: 1024)
    pub actor_max_entries: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (BADGEHARBOR_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("federation.key_bits", 2048)?
            .set_default("jobs.poll_interval_seconds", 60)?
            .set_default("jobs.batch_size", 5)?
            .set_default("jobs.max_retries", 5)?
            .set_default("cache.actor_ttl", 3600)?
            .set_default("cache.actor_max_entries", 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (BADGEHARBOR_*)
            .add_source(
                Environment::with_prefix("BADGEHARBOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.federation.domains.is_empty() {
            return Err(crate::error::AppError::Config(
                "federation.domains must list at least one served domain".to_string(),
            ));
        }

        for domain in &self.federation.domains {
            if domain.domain.trim().is_empty() {
                return Err(crate::error::AppError::Config(
                    "federation.domains entries must have a non-empty domain".to_string(),
                ));
            }
            if domain.default_actor.trim().is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "federation domain {} must name a default_actor",
                    domain.domain
                )));
            }
        }

        if self.jobs.poll_interval_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "jobs.poll_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.jobs.batch_size == 0 {
            return Err(crate::error::AppError::Config(
                "jobs.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.jobs.max_retries < 0 {
            return Err(crate::error::AppError::Config(
                "jobs.max_retries must not be negative".to_string(),
            ));
        }

        if self.federation.key_bits < 2048 {
            return Err(crate::error::AppError::Config(
                "federation.key_bits must be at least 2048".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                protocol: "http".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/badgeharbor-test.db"),
            },
            federation: FederationConfig {
                domains: vec![DomainConfig {
                    domain: "badges.example.com".to_string(),
                    default_actor: "badges".to_string(),
                    relay_actor: None,
                }],
                key_bits: 2048,
            },
            jobs: JobsConfig {
                poll_interval_seconds: 60,
                batch_size: 5,
                max_retries: 5,
            },
            cache: CacheConfig {
                actor_ttl: 3600,
                actor_max_entries: 1024,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_single_domain_config() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_domain_list() {
        let mut config = valid_config();
        config.federation.domains.clear();

        let error = config
            .validate()
            .expect_err("empty domain list must fail validation");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("federation.domains")
        ));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let mut config = valid_config();
        config.jobs.poll_interval_seconds = 0;

        let error = config
            .validate()
            .expect_err("zero poll interval must fail validation");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("poll_interval_seconds")
        ));
    }

    #[test]
    fn relay_actor_falls_back_to_default_actor() {
        let config = valid_config();
        assert_eq!(config.federation.domains[0].relay_actor(), "badges");

        let mut config = valid_config();
        config.federation.domains[0].relay_actor = Some("relay".to_string());
        assert_eq!(config.federation.domains[0].relay_actor(), "relay");
    }
}
