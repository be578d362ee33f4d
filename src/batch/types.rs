//! EIP-5792 wire types

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single value transfer inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    /// Lowercase `0x` quantity in wei
    pub value: String,
}

impl Call {
    pub fn new(to: Address, value: U256) -> Self {
        Self {
            to,
            value: to_hex_quantity(value),
        }
    }
}

/// `wallet_sendCalls` request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub version: String,
    pub chain_id: String,
    pub from: Address,
    pub atomic_required: bool,
    pub calls: Vec<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<RequestCapabilities>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCapabilities {
    pub paymaster_service: PaymasterServiceDirective,
}

/// Ask the wallet to route gas through a paymaster; the url is resolved by the wallet when unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterServiceDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Opaque identifier returned for an asynchronously executed batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a submission as interpreted from the wallet response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Executed, hash known immediately
    TransactionHash(String),
    /// Accepted for asynchronous execution, poll with the id
    Pending(BatchId),
    /// Neither a hash nor an id came back
    NoHashOrId,
}

/// `wallet_getCallsStatus` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallsStatus {
    /// Numeric status code; wallets on older drafts send strings, which read as pending
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub receipts: Option<Vec<CallReceipt>>,
}

impl CallsStatus {
    pub fn status_code(&self) -> Option<u64> {
        self.status.as_ref().and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl CallReceipt {
    /// Hash of the receipt, whichever field name the wallet used
    pub fn tx_hash(&self) -> Option<&str> {
        let present = |h: &&str| !h.is_empty();
        self.transaction_hash
            .as_deref()
            .filter(present)
            .or_else(|| self.hash.as_deref().filter(present))
    }
}

/// Render an integer as a lowercase `0x` quantity without leading zeros
pub fn to_hex_quantity(value: U256) -> String {
    format!("{:#x}", value)
}
