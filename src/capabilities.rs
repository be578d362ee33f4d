//! Wallet capability negotiation (`wallet_getCapabilities`)
//!
//! Capabilities are scoped to an account and a chain. They are fetched fresh
//! for the active chain and never cached beyond the current session.

use crate::error::{RelayerError, RelayerResult};
use crate::wallet::{chain_id_hex, methods, WalletProvider};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Atomic batch execution support reported by the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicStatus {
    Supported,
    Ready,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicCapability {
    pub status: AtomicStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterCapability {
    #[serde(default)]
    pub supported: bool,
}

/// Capabilities of one chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atomic: Option<AtomicCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_service: Option<PaymasterCapability>,
}

/// Full `wallet_getCapabilities` response, keyed by hex chain id
pub type CapabilitySet = HashMap<String, Value>;

impl ChainCapabilities {
    pub fn atomic_supported(&self) -> bool {
        matches!(
            self.atomic.as_ref().map(|a| a.status),
            Some(AtomicStatus::Ready | AtomicStatus::Supported)
        )
    }

    pub fn paymaster_supported(&self) -> bool {
        self.paymaster_service
            .as_ref()
            .map(|p| p.supported)
            .unwrap_or(false)
    }
}

/// True when capabilities are present and allow atomic batches
pub fn is_atomic_supported(caps: Option<&ChainCapabilities>) -> bool {
    caps.map(ChainCapabilities::atomic_supported).unwrap_or(false)
}

/// True when capabilities are present and advertise a paymaster service
pub fn is_paymaster_supported(caps: Option<&ChainCapabilities>) -> bool {
    caps.map(ChainCapabilities::paymaster_supported).unwrap_or(false)
}

/// Query capabilities for `chain_id`, surfacing failures as errors.
///
/// `Ok(None)` means the wallet answered but listed nothing for this chain.
pub async fn try_query_capabilities(
    wallet: &dyn WalletProvider,
    account: Address,
    chain_id: u64,
) -> RelayerResult<Option<ChainCapabilities>> {
    let chain_hex = chain_id_hex(chain_id);

    let response = match wallet.batch_api() {
        Some(api) => api.get_capabilities(account, vec![chain_hex.clone()]).await,
        None => {
            wallet
                .request(methods::GET_CAPABILITIES, json!([account, [chain_hex]]))
                .await
        }
    }
    .map_err(|e| RelayerError::Capability {
        chain_id,
        message: e.to_string(),
    })?;

    let all: CapabilitySet =
        serde_json::from_value(response).map_err(|e| RelayerError::Capability {
            chain_id,
            message: format!("unexpected response shape: {}", e),
        })?;

    let entry = match all.get(&chain_hex) {
        Some(Value::Null) | None => {
            debug!("Wallet reported no capabilities for chain {}", chain_id);
            return Ok(None);
        }
        Some(entry) => entry.clone(),
    };

    serde_json::from_value(entry)
        .map(Some)
        .map_err(|e| RelayerError::Capability {
            chain_id,
            message: format!("malformed capability entry: {}", e),
        })
}

/// Query capabilities for `chain_id`; any failure reads as "no capabilities"
pub async fn query_capabilities(
    wallet: &dyn WalletProvider,
    account: Address,
    chain_id: u64,
) -> Option<ChainCapabilities> {
    match try_query_capabilities(wallet, account, chain_id).await {
        Ok(caps) => caps,
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}
