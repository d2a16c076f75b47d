//! Configuration management for the server.

use shopsync_engine::{ConflictPolicy, EngineConfig, RetryConfig};
use std::env;
use std::str::FromStr;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; without one, state lives in memory
    pub database_url: Option<String>,
    /// When set, every request must carry a bearer token
    pub auth_secret: Option<String>,
    /// Businesses registered in the in-memory store at startup
    pub dev_businesses: Vec<String>,
    pub conflict_policy: ConflictPolicy,
    /// Attempts per operation on storage failure
    pub sync_max_retries: u32,
    pub ledger_checkpoint_interval: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let dev_businesses = env::var("DEV_BUSINESSES")
            .map(|list| parse_list(&list))
            .unwrap_or_default();

        let conflict_policy = match env::var("CONFLICT_POLICY") {
            Ok(value) => ConflictPolicy::from_str(&value).map_err(ConfigError::InvalidPolicy)?,
            Err(_) => ConflictPolicy::default(),
        };

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            dev_businesses,
            conflict_policy,
            sync_max_retries: parse_number("SYNC_MAX_RETRIES", 3)?,
            ledger_checkpoint_interval: parse_number("LEDGER_CHECKPOINT_INTERVAL", 64)?,
        })
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_conflict_policy(self.conflict_policy)
            .with_retry(RetryConfig::new(self.sync_max_retries))
            .with_checkpoint_interval(self.ledger_checkpoint_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            auth_secret: None,
            dev_businesses: Vec::new(),
            conflict_policy: ConflictPolicy::default(),
            sync_max_retries: 3,
            ledger_checkpoint_interval: 64,
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber(var)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid CONFLICT_POLICY: {0}")]
    InvalidPolicy(String),

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_business_list() {
        assert_eq!(
            parse_list(" shop-1, shop-2 ,,"),
            vec!["shop-1".to_string(), "shop-2".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn default_policy_compares_server_time() {
        assert_eq!(Config::default().conflict_policy, ConflictPolicy::ServerTimestamp);
        assert_eq!(
            Config::default().engine_config().conflict_policy,
            ConflictPolicy::ServerTimestamp
        );
    }

    #[test]
    fn engine_config_follows_settings() {
        let config = Config {
            conflict_policy: ConflictPolicy::BaseVersion,
            sync_max_retries: 5,
            ledger_checkpoint_interval: 16,
            ..Config::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.conflict_policy, ConflictPolicy::BaseVersion);
        assert_eq!(engine.retry.max_attempts, 5);
        assert_eq!(engine.checkpoint_interval, 16);
    }
}
