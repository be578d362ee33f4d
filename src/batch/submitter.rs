//! Batch submission (`wallet_sendCalls`) and response classification

use super::types::{BatchId, BatchRequest, SubmissionOutcome};
use crate::error::{RelayerError, RelayerResult};
use crate::wallet::{methods, WalletProvider};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Send a batch through the wallet and classify what came back.
///
/// Errors raised by the wallet abort the submission; nothing is polled.
pub async fn submit_batch(
    wallet: &dyn WalletProvider,
    request: &BatchRequest,
) -> RelayerResult<SubmissionOutcome> {
    debug!(
        "Submitting batch of {} calls on chain {}",
        request.calls.len(),
        request.chain_id
    );

    let response = match wallet.batch_api() {
        Some(api) => api.send_calls(request.clone()).await,
        None => wallet.request(methods::SEND_CALLS, json!([request])).await,
    }
    .map_err(|e| match e {
        RelayerError::Rpc { message, .. } => RelayerError::Submission(message),
        other => RelayerError::Submission(other.to_string()),
    })?;

    let outcome = classify_response(&response);
    match &outcome {
        SubmissionOutcome::TransactionHash(hash) => info!("Batch executed with tx {}", hash),
        SubmissionOutcome::Pending(id) => info!("Batch accepted, pending id {}", id),
        SubmissionOutcome::NoHashOrId => warn!("wallet_sendCalls returned no hash or id: {}", response),
    }

    Ok(outcome)
}

/// Interpret a `wallet_sendCalls` response; the first matching rule wins
pub fn classify_response(response: &Value) -> SubmissionOutcome {
    // 1. a bare hash
    if let Some(hash) = response.as_str().filter(|h| !h.is_empty()) {
        return SubmissionOutcome::TransactionHash(hash.to_string());
    }

    // 2. an object carrying a hash
    for field in ["transactionHash", "hash"] {
        if let Some(hash) = response.get(field).and_then(Value::as_str).filter(|h| !h.is_empty()) {
            return SubmissionOutcome::TransactionHash(hash.to_string());
        }
    }

    // 3. an object carrying a batch id
    match response.get("id") {
        Some(Value::String(id)) if !id.is_empty() => {
            SubmissionOutcome::Pending(BatchId(id.clone()))
        }
        Some(Value::Number(id)) => SubmissionOutcome::Pending(BatchId(id.to_string())),
        // 4. nothing usable
        _ => SubmissionOutcome::NoHashOrId,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchBuilder, CallInput};
    use crate::test_utils::{ScriptedWallet, ACCOUNT, RECIPIENT};
    use crate::wallet::{BatchApi, MockBatchApi, MockWalletProvider};
    use std::sync::Arc;

    fn request() -> BatchRequest {
        BatchBuilder::default()
            .build(
                100,
                ACCOUNT.parse().unwrap(),
                &[CallInput::new(RECIPIENT, "1")],
                false,
            )
            .unwrap()
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(
            classify_response(&json!("0xabc")),
            SubmissionOutcome::TransactionHash("0xabc".to_string())
        );
        assert_eq!(
            classify_response(&json!({ "transactionHash": "0xabc" })),
            SubmissionOutcome::TransactionHash("0xabc".to_string())
        );
        assert_eq!(
            classify_response(&json!({ "hash": "0xabc", "id": "42" })),
            SubmissionOutcome::TransactionHash("0xabc".to_string())
        );
        assert_eq!(
            classify_response(&json!({ "id": "42" })),
            SubmissionOutcome::Pending(BatchId("42".to_string()))
        );
        assert_eq!(
            classify_response(&json!({ "id": 42 })),
            SubmissionOutcome::Pending(BatchId("42".to_string()))
        );
        assert_eq!(classify_response(&json!({})), SubmissionOutcome::NoHashOrId);
        assert_eq!(classify_response(&json!(null)), SubmissionOutcome::NoHashOrId);
        assert_eq!(classify_response(&json!({ "id": "" })), SubmissionOutcome::NoHashOrId);
    }

    #[tokio::test]
    async fn test_generic_request_sends_request_as_sole_param() {
        let wallet = ScriptedWallet::new();
        wallet.respond(methods::SEND_CALLS, json!({ "id": "42" }));

        let request = request();
        let outcome = submit_batch(&wallet, &request).await.unwrap();
        assert_eq!(outcome, SubmissionOutcome::Pending(BatchId("42".to_string())));

        let params = wallet.params_of(methods::SEND_CALLS);
        assert_eq!(params, vec![json!([serde_json::to_value(&request).unwrap()])]);
    }

    #[tokio::test]
    async fn test_prefers_direct_surface() {
        let mut api = MockBatchApi::new();
        api.expect_send_calls()
            .times(1)
            .returning(|request| {
                assert!(request.atomic_required);
                Ok(json!({ "transactionHash": "0xabc" }))
            });
        let api: Arc<dyn BatchApi> = Arc::new(api);

        let mut wallet = MockWalletProvider::new();
        wallet.expect_batch_api().returning(move || Some(api.clone()));
        wallet.expect_request().never();

        let outcome = submit_batch(&wallet, &request()).await.unwrap();
        assert_eq!(outcome, SubmissionOutcome::TransactionHash("0xabc".to_string()));
    }

    #[tokio::test]
    async fn test_wallet_error_surfaces_message() {
        let wallet = ScriptedWallet::new();
        wallet.fail(methods::SEND_CALLS, "User rejected the request");

        let err = submit_batch(&wallet, &request()).await.unwrap_err();
        assert!(matches!(&err, RelayerError::Submission(m) if m == "User rejected the request"));
    }
}
