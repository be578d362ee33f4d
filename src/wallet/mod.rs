//! Wallet module - abstraction over a connected external signer
//!
//! This module provides:
//! - The `WalletProvider` trait every wallet surface implements
//! - An optional direct EIP-5792 surface (`BatchApi`) probed at call time
//! - A JSON-RPC over HTTP wallet with endpoint failover
//! - Provider discovery and the connected wallet session

pub mod registry;
pub mod rpc;
pub mod session;

pub use registry::{announce, ProviderAnnouncement, ProviderInfo, ProviderRegistry, RegistryMessage};
pub use rpc::RpcWallet;
pub use session::WalletSession;

use crate::batch::BatchRequest;
use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::Address;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// JSON-RPC method names used against the wallet
pub mod methods {
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const GET_CAPABILITIES: &str = "wallet_getCapabilities";
    pub const SEND_CALLS: &str = "wallet_sendCalls";
    pub const GET_CALLS_STATUS: &str = "wallet_getCallsStatus";
}

/// Notifications a wallet pushes while connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// Generic request surface shared by every wallet
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Issue a raw request against the wallet
    async fn request(&self, method: &str, params: Value) -> RelayerResult<Value>;

    /// Direct EIP-5792 surface, if the wallet exposes one
    fn batch_api(&self) -> Option<Arc<dyn BatchApi>> {
        None
    }

    /// Account and chain change notifications, if the wallet emits them
    fn subscribe_events(&self) -> Option<broadcast::Receiver<WalletEvent>> {
        None
    }
}

/// Richer wallet surface exposing EIP-5792 operations as typed methods
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchApi: Send + Sync {
    async fn get_capabilities(
        &self,
        account: Address,
        chain_ids: Vec<String>,
    ) -> RelayerResult<Value>;

    async fn send_calls(&self, request: BatchRequest) -> RelayerResult<Value>;
}

/// Render a chain id as a lowercase `0x` quantity
pub fn chain_id_hex(chain_id: u64) -> String {
    format!("{:#x}", chain_id)
}

/// Parse a `0x` quantity or decimal string into a chain id
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
