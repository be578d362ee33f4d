//! Configuration management for the batch relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of calls accepted in one batch
pub const MAX_CALLS: usize = 3;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub wallet: WalletConfig,
    pub batch: BatchConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// JSON-RPC endpoints of the wallet, tried in order
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long to wait for wallets answering the discovery request
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Request gas sponsorship when the wallet advertises a paymaster
    #[serde(default)]
    pub sponsor: bool,
    pub calls: Vec<CallConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    pub chain_list_url: String,
    pub fallback_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_discovery_window_ms() -> u64 {
    500
}

fn default_version() -> String {
    "2.0.0".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            chain_list_url:
                "https://raw.githubusercontent.com/ethereum-lists/chains/master/_data/chains.json"
                    .to_string(),
            fallback_url: "https://gnosisscan.io/".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl WalletConfig {
    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// Load settings from the file named by `BATCH_RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BATCH_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.wallet.rpc_urls.is_empty() {
            anyhow::bail!("Wallet has no RPC URLs configured");
        }

        if self.batch.calls.is_empty() || self.batch.calls.len() > MAX_CALLS {
            anyhow::bail!(
                "A batch needs between 1 and {} calls, got {}",
                MAX_CALLS,
                self.batch.calls.len()
            );
        }

        if self.batch.calls[0].to.trim().is_empty() {
            anyhow::bail!("First call requires a destination address");
        }

        if self.batch.poll_interval_ms == 0 {
            anyhow::bail!("batch.poll_interval_ms must be greater than zero");
        }

        if self.api.enabled && self.metrics.enabled && self.api.port == self.metrics.port {
            tracing::warn!(
                "API and metrics share port {} - metrics server will fail to bind",
                self.api.port
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [wallet]
        rpc_urls = ["http://localhost:8545"]

        [batch]
        [[batch.calls]]
        to = "0x1111111111111111111111111111111111111111"
        amount = "0.5"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("BATCH_RELAYER_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${BATCH_RELAYER_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::parse(MINIMAL).unwrap();
        assert_eq!(settings.batch.version, "2.0.0");
        assert_eq!(settings.wallet.discovery_window(), Duration::from_millis(500));
        assert_eq!(settings.batch.poll_interval(), Duration::from_millis(1500));
        assert!(!settings.batch.sponsor);
        assert_eq!(settings.explorer.fallback_url, "https://gnosisscan.io/");
        assert!(!settings.api.enabled);
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_rejects_missing_first_destination() {
        let input = r#"
            [wallet]
            rpc_urls = ["http://localhost:8545"]

            [batch]
            [[batch.calls]]
            amount = "1"
        "#;
        let err = Settings::parse(input).unwrap_err();
        assert!(err.to_string().contains("First call"));
    }

    #[test]
    fn test_rejects_too_many_calls() {
        let mut input = String::from(
            "[wallet]\nrpc_urls = [\"http://localhost:8545\"]\n[batch]\n",
        );
        for _ in 0..4 {
            input.push_str("[[batch.calls]]\nto = \"0x1111111111111111111111111111111111111111\"\n");
        }
        assert!(Settings::parse(&input).is_err());
    }

    #[test]
    fn test_rejects_empty_rpc_urls() {
        let input = MINIMAL.replace("[\"http://localhost:8545\"]", "[]");
        assert!(Settings::parse(&input).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.wallet.rpc_urls, vec!["http://localhost:8545"]);
        assert_eq!(settings.batch.calls[0].amount, "0.5");
    }
}
