//! Confirmation polling for asynchronously executed batches
//!
//! A poller is a spawned task bound to one batch id. It issues
//! `wallet_getCallsStatus` on a fixed interval until the wallet reports a
//! terminal status or the owning `PollHandle` is cancelled or dropped.
//! Status requests never overlap: each tick awaits its request and ticks
//! missed while waiting are skipped.

use super::types::{BatchId, CallsStatus};
use crate::error::RelayerError;
use crate::wallet::{methods, WalletProvider};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default delay between two status requests
pub const POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Terminal state of a polled batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Executed on chain with the hash of the first receipt
    Confirmed(String),
    /// Wallet reported an error-class status code
    Failed(u64),
}

/// What a single status response means for the poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    Done(PollOutcome),
    Pending,
}

/// Interpret one `wallet_getCallsStatus` response
pub fn classify_status(status: &CallsStatus) -> PollStep {
    match status.status_code() {
        Some(200) => status
            .receipts
            .as_ref()
            .and_then(|receipts| receipts.first())
            .and_then(|receipt| receipt.tx_hash())
            .map(|hash| PollStep::Done(PollOutcome::Confirmed(hash.to_string())))
            .unwrap_or(PollStep::Pending),
        Some(code) if code >= 400 => PollStep::Done(PollOutcome::Failed(code)),
        _ => PollStep::Pending,
    }
}

/// Handle to a running poller; cancelling or dropping it stops the loop
#[derive(Debug)]
pub struct PollHandle {
    id: BatchId,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn id(&self) -> &BatchId {
        &self.id
    }

    /// Stop polling; no status request is issued afterwards
    pub fn cancel(&self) {
        if !*self.cancel.borrow() {
            debug!("Cancelling status polling for batch {}", self.id);
            let _ = self.cancel.send(true);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawns status pollers
pub struct ConfirmationPoller;

impl ConfirmationPoller {
    /// Start polling `id`. The receiver yields the terminal outcome, or an
    /// error if polling was cancelled first.
    pub fn spawn(
        wallet: Arc<dyn WalletProvider>,
        id: BatchId,
        period: Duration,
    ) -> (PollHandle, oneshot::Receiver<PollOutcome>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        info!("Polling status of batch {} every {:?}", id, period);
        let task = tokio::spawn(poll_loop(wallet, id.clone(), period, cancel_rx, outcome_tx));

        (
            PollHandle {
                id,
                cancel: cancel_tx,
                task,
            },
            outcome_rx,
        )
    }
}

async fn poll_loop(
    wallet: Arc<dyn WalletProvider>,
    id: BatchId,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
    outcome_tx: oneshot::Sender<PollOutcome>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }
        if *cancel.borrow() {
            break;
        }

        crate::metrics::record_poll_tick();

        // A response landing after cancellation is discarded with the future
        let response = tokio::select! {
            biased;
            _ = cancel.changed() => break,
            response = wallet.request(methods::GET_CALLS_STATUS, json!([id.0])) => response,
        };

        let status = response.and_then(|value| {
            serde_json::from_value::<CallsStatus>(value).map_err(|e| {
                RelayerError::MalformedResponse {
                    method: methods::GET_CALLS_STATUS.to_string(),
                    message: e.to_string(),
                }
            })
        });

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                warn!("Status check for batch {} failed, retrying: {}", id, e);
                crate::metrics::record_poll_error();
                continue;
            }
        };

        match classify_status(&status) {
            PollStep::Done(outcome) => {
                match &outcome {
                    PollOutcome::Confirmed(hash) => info!("Batch {} executed in tx {}", id, hash),
                    PollOutcome::Failed(code) => warn!("Batch {} failed with status {}", id, code),
                }
                let _ = outcome_tx.send(outcome);
                return;
            }
            PollStep::Pending => {
                debug!("Batch {} still pending (status {:?})", id, status.status);
            }
        }
    }

    debug!("Status polling for batch {} stopped", id);
}
