//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// Database configuration, present only when DATABASE_URL is set
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Base URLs of the remote collaborators. `None` selects the in-memory stand-in.
#[derive(Debug, Clone, Default)]
pub struct ServicesConfig {
    pub embedding_url: Option<url::Url>,
    pub token_ledger_url: Option<url::Url>,
    pub governance_url: Option<url::Url>,
    pub timeout: Duration,
}

/// Tunables for the proposal engine
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    /// How long a proposal stays open for voting
    pub voting_window: chrono::Duration,
    /// Attempts per document before an embed is reported as failed
    pub embed_max_attempts: u32,
    /// First retry delay, doubled on each further attempt
    pub embed_backoff: Duration,
    pub embed_concurrency: usize,
    pub max_documents_per_proposal: usize,
    pub auto_execute_permissionless: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            voting_window: chrono::Duration::hours(168),
            embed_max_attempts: 3,
            embed_backoff: Duration::from_millis(200),
            embed_concurrency: 4,
            max_documents_per_proposal: 100,
            auto_execute_permissionless: true,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub services: ServicesConfig,
    pub governance: GovernanceConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: env_parse("HOST").unwrap_or_else(|| ServerConfig::default().host),
            port: env_parse("PORT").unwrap_or_else(|| ServerConfig::default().port),
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(database_url) if !database_url.trim().is_empty() => {
                Some(Self::parse_database_url(&database_url)?)
            }
            _ => None,
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let services = ServicesConfig {
            embedding_url: Self::service_url("EMBEDDING_SERVICE_URL")?,
            token_ledger_url: Self::service_url("TOKEN_LEDGER_URL")?,
            governance_url: Self::service_url("GOVERNANCE_SERVICE_URL")?,
            timeout: Duration::from_secs(env_parse("EXTERNAL_TIMEOUT_SECS").unwrap_or(30)),
        };

        let defaults = GovernanceConfig::default();
        let governance = GovernanceConfig {
            voting_window: env_parse::<i64>("VOTING_WINDOW_HOURS")
                .filter(|h| *h > 0)
                .map(chrono::Duration::hours)
                .unwrap_or(defaults.voting_window),
            embed_max_attempts: env_parse::<u32>("EMBED_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.embed_max_attempts),
            embed_backoff: env_parse("EMBED_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.embed_backoff),
            embed_concurrency: env_parse::<usize>("EMBED_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.embed_concurrency),
            max_documents_per_proposal: env_parse::<usize>("MAX_DOCUMENTS_PER_PROPOSAL")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_documents_per_proposal),
            auto_execute_permissionless: env_parse("AUTO_EXECUTE_PERMISSIONLESS")
                .unwrap_or(defaults.auto_execute_permissionless),
        };

        Ok(Self {
            server,
            database,
            cors,
            services,
            governance,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let require_tls = host.contains("neon.tech")
            || parsed
                .query_pairs()
                .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database,
            max_pool_size: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            require_tls,
        })
    }

    /// Read an optional http(s) base URL
    fn service_url(var: &str) -> Result<Option<url::Url>, ConfigError> {
        match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => {
                let parsed = url::Url::parse(raw.trim())
                    .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", var, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidValue(format!(
                        "{} must be an http(s) URL",
                        var
                    )));
                }
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}
