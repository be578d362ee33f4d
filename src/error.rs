//! Error types for the batch relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet connection failed: {0}")]
    Connection(String),

    #[error("RPC error calling {method}: {message}")]
    Rpc { method: String, message: String },

    #[error("Malformed {method} response: {message}")]
    MalformedResponse { method: String, message: String },

    #[error("Capability query failed for chain {chain_id}: {message}")]
    Capability { chain_id: u64, message: String },

    #[error("Invalid call #{index}: {message}")]
    InvalidCall { index: usize, message: String },

    #[error("wallet_sendCalls failed: {0}")]
    Submission(String),

    #[error("Please connect a wallet first")]
    NotConnected,

    #[error("Atomic batching is not supported by the connected wallet on chain {chain_id}")]
    AtomicUnsupported { chain_id: u64 },

    #[error("A batch submission is already in flight")]
    SubmissionInFlight,

    #[error("Batch {id} is still pending")]
    BatchPending { id: String },

    #[error("Explorer lookup failed: {0}")]
    Explorer(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is a precondition failure of a controller command
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            RelayerError::NotConnected
                | RelayerError::AtomicUnsupported { .. }
                | RelayerError::SubmissionInFlight
                | RelayerError::BatchPending { .. }
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_errors() {
        assert!(RelayerError::SubmissionInFlight.is_guard());
        assert!(RelayerError::AtomicUnsupported { chain_id: 100 }.is_guard());
        assert!(RelayerError::BatchPending { id: "42".to_string() }.is_guard());
        assert!(!RelayerError::Connection("rejected".to_string()).is_guard());
    }

    #[test]
    fn test_submission_message_carries_cause() {
        let err = RelayerError::Submission("User rejected the request".to_string());
        assert_eq!(
            err.to_string(),
            "wallet_sendCalls failed: User rejected the request"
        );
    }
}
