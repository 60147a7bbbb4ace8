//! Configuration module for the settlement engine server.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::types::{PaymentRequest, PaymentRequestError};

/// CLI arguments for the settlement engine server.
#[derive(Parser, Debug)]
#[command(name = "settle-rs")]
#[command(about = "Cross-chain payment settlement HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    oracle: OracleConfig,
    /// Seconds a transaction may stay pending before lazy expiry fails it.
    #[serde(default = "config_defaults::default_expiry_secs")]
    expiry_secs: u64,
    /// Notification webhook endpoint. Notifications are logged when absent.
    #[serde(default)]
    notification_webhook: Option<Url>,
    /// Payment requests seeded at startup. Merchant-facing CRUD lives in a
    /// separate service; this engine only reads them.
    #[serde(default)]
    requests: Vec<PaymentRequest>,
}

/// Price feed provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Base URL of the Hermes-compatible feed. Must end with a slash so
    /// endpoint paths join under it.
    #[serde(default = "config_defaults::default_oracle_url")]
    base_url: Url,
    #[serde(default = "config_defaults::default_oracle_timeout_secs")]
    timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            base_url: config_defaults::default_oracle_url(),
            timeout_secs: config_defaults::default_oracle_timeout_secs(),
        }
    }
}

impl OracleConfig {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            oracle: OracleConfig::default(),
            expiry_secs: config_defaults::default_expiry_secs(),
            notification_webhook: None,
            requests: Vec::new(),
        }
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;
    use url::Url;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_ORACLE_URL: &str = "https://hermes.pyth.network/api/";
    pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_EXPIRY_SECS: u64 = 10 * 60;

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    /// Returns the feed URL with fallback: $ORACLE_URL env var -> Hermes mainnet
    pub fn default_oracle_url() -> Url {
        env::var("ORACLE_URL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DEFAULT_ORACLE_URL.parse().unwrap())
    }

    pub fn default_oracle_timeout_secs() -> u64 {
        DEFAULT_ORACLE_TIMEOUT_SECS
    }

    pub fn default_expiry_secs() -> u64 {
        env::var("EXPIRY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EXPIRY_SECS)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid payment request in config: {0}")]
    InvalidRequest(#[from] PaymentRequestError),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn oracle(&self) -> &OracleConfig {
        &self.oracle
    }

    /// The lazy-expiry window for pending transactions.
    pub fn expiry_window(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn notification_webhook(&self) -> Option<&Url> {
        self.notification_webhook.as_ref()
    }

    pub fn requests(&self) -> &[PaymentRequest] {
        &self.requests
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by the `--config <path>` CLI
    /// argument or the `CONFIG` env var, defaulting to `./config.json`. A
    /// missing file at the default path falls back to pure defaults so the
    /// server can start with no local state.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        if !cli_args.config.exists() {
            tracing::info!(path = %cli_args.config.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        Self::load_from_path(cli_args.config)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        for request in &config.requests {
            request.validate()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.expiry_window(), Duration::from_secs(600));
        assert!(config.notification_webhook().is_none());
        assert!(config.requests().is_empty());
        assert!(
            config
                .oracle()
                .base_url()
                .as_str()
                .ends_with('/'),
            "oracle base URL must end with a slash for path joins"
        );
    }

    #[test]
    fn test_parses_full_config() {
        let raw = r#"{
            "port": 9090,
            "host": "127.0.0.1",
            "expiry_secs": 300,
            "oracle": {"base_url": "https://feed.example.com/api/", "timeout_secs": 5},
            "notification_webhook": "https://mail.example.com/hooks/settle",
            "requests": [{
                "id": "0192a9be-7c5f-7d2e-a3a4-5a2d3d4e5f60",
                "amountUsd": "10",
                "chainIds": ["1", "8453"],
                "merchantAddress": "0x1111111111111111111111111111111111111111",
                "merchantContact": "merchant@example.com"
            }]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.port(), 9090);
        assert_eq!(config.expiry_window(), Duration::from_secs(300));
        assert_eq!(config.oracle().timeout(), Duration::from_secs(5));
        assert!(config.notification_webhook().is_some());
        let request = &config.requests()[0];
        assert!(request.is_active);
        assert_eq!(request.chain_ids, vec![Network::Ethereum, Network::Base]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_seeded_request() {
        let request: PaymentRequest = serde_json::from_str(
            r#"{
                "id": "0192a9be-7c5f-7d2e-a3a4-5a2d3d4e5f60",
                "amountUsd": "10",
                "chainIds": [],
                "merchantAddress": "0x1111111111111111111111111111111111111111",
                "merchantContact": "merchant@example.com"
            }"#,
        )
        .unwrap();
        assert!(request.validate().is_err());
    }
}
