//! Connected wallet session

use super::{methods, parse_chain_id, WalletProvider};
use crate::error::{RelayerError, RelayerResult};

use ethers::types::Address;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// A wallet connection scoped to one account on one chain
#[derive(Clone)]
pub struct WalletSession {
    pub address: Address,
    pub chain_id: u64,
    pub provider: Arc<dyn WalletProvider>,
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl WalletSession {
    /// Request accounts and the active chain from a wallet
    pub async fn connect(provider: Arc<dyn WalletProvider>) -> RelayerResult<Self> {
        let accounts = provider
            .request(methods::REQUEST_ACCOUNTS, json!([]))
            .await
            .map_err(|e| RelayerError::Connection(e.to_string()))?;
        let address = first_account(&accounts)?;

        let chain_id = provider
            .request(methods::CHAIN_ID, json!([]))
            .await
            .map_err(|e| RelayerError::Connection(e.to_string()))?;
        let chain_id = chain_id
            .as_str()
            .and_then(parse_chain_id)
            .or_else(|| chain_id.as_u64())
            .ok_or_else(|| {
                RelayerError::Connection(format!("Unexpected eth_chainId response: {}", chain_id))
            })?;

        info!("Connected account {:?} on chain {}", address, chain_id);

        Ok(Self {
            address,
            chain_id,
            provider,
        })
    }

    /// Shortened address for display, `0x1234…abcd`
    pub fn short_address(&self) -> String {
        let full = format!("{:?}", self.address);
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

fn first_account(accounts: &Value) -> RelayerResult<Address> {
    accounts
        .as_array()
        .and_then(|list| list.first())
        .and_then(Value::as_str)
        .ok_or_else(|| RelayerError::Connection("Wallet returned no accounts".to_string()))?
        .parse()
        .map_err(|e| RelayerError::Connection(format!("Invalid account address: {}", e)))
}
