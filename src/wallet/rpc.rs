//! JSON-RPC wallet with multi-endpoint support and automatic failover

use super::WalletProvider;
use crate::config::WalletConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Wallet reachable over HTTP JSON-RPC (a local signer, a bundler, a relay)
pub struct RpcWallet {
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Per-request timeout
    request_timeout: Duration,
}

impl RpcWallet {
    /// Create a new wallet client from configuration
    pub fn new(config: &WalletConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider);
                    debug!("Added wallet endpoint: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create wallet endpoint for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::Connection(
                "No valid wallet RPC endpoints".to_string(),
            ));
        }

        Ok(Self {
            http_providers,
            current_provider: AtomicUsize::new(0),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available endpoint
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Wallet failover to endpoint {}", next);
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn request(&self, method: &str, params: Value) -> RelayerResult<Value> {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            let result = timeout(
                self.request_timeout,
                self.http().request::<_, Value>(method, params.clone()),
            )
            .await;

            match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    // The wallet answered with a JSON-RPC error; another endpoint won't help
                    if let Some(rejected) = wallet_error(method, &e) {
                        return Err(rejected);
                    }
                    warn!("Wallet request {} failed: {}", method, e);
                    last_error = Some(RelayerError::Rpc {
                        method: method.to_string(),
                        message: e.to_string(),
                    });
                    self.failover();
                }
                Err(_) => {
                    warn!("Wallet request {} timed out", method);
                    last_error = Some(RelayerError::Timeout {
                        operation: method.to_string(),
                    });
                    self.failover();
                }
            }
        }

        Err(last_error.unwrap_or(RelayerError::Rpc {
            method: method.to_string(),
            message: "All wallet endpoints failed".to_string(),
        }))
    }
}

/// Error the wallet itself returned, carrying only its JSON-RPC message
fn wallet_error(method: &str, error: &ProviderError) -> Option<RelayerError> {
    match error {
        ProviderError::JsonRpcClientError(e) => {
            e.as_error_response().map(|response| RelayerError::Rpc {
                method: method.to_string(),
                message: response.message.clone(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    #[test]
    fn test_wallet_error_keeps_only_message() {
        let error = ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(
            JsonRpcError {
                code: 4001,
                message: "User rejected the request".to_string(),
                data: Some(serde_json::json!({ "reason": "denied" })),
            },
        )));

        match wallet_error("wallet_sendCalls", &error) {
            Some(RelayerError::Rpc { method, message }) => {
                assert_eq!(method, "wallet_sendCalls");
                assert_eq!(message, "User rejected the request");
            }
            other => panic!("unexpected {:?}", other),
        }

        let transport = ProviderError::CustomError("connection refused".to_string());
        assert!(wallet_error("wallet_sendCalls", &transport).is_none());
    }

    #[test]
    fn test_rejects_config_without_valid_endpoints() {
        let config = WalletConfig {
            rpc_urls: vec!["not a url".to_string()],
            request_timeout_secs: 5,
            discovery_window_ms: 500,
        };
        assert!(matches!(
            RpcWallet::new(&config),
            Err(RelayerError::Connection(_))
        ));
    }

    #[test]
    fn test_failover_rotates_endpoints() {
        let config = WalletConfig {
            rpc_urls: vec![
                "http://localhost:8545".to_string(),
                "http://localhost:8546".to_string(),
            ],
            request_timeout_secs: 5,
            discovery_window_ms: 500,
        };
        let wallet = RpcWallet::new(&config).unwrap();
        assert_eq!(wallet.current_provider.load(Ordering::Relaxed), 0);
        wallet.failover();
        assert_eq!(wallet.current_provider.load(Ordering::Relaxed), 1);
        wallet.failover();
        assert_eq!(wallet.current_provider.load(Ordering::Relaxed), 0);
    }
}
