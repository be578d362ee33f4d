//! Batch controller - the single owner of wallet, capability and pending state
//!
//! Every user action is a command with a precondition. Long-running work
//! (wallet requests, status polling) happens outside the state lock, and any
//! result is checked against the still-current session or pending id before
//! it is applied.

mod notice;

pub use notice::{Notice, NoticeLevel};

use crate::batch::{
    submit_batch, BatchBuilder, BatchId, CallInput, ConfirmationPoller, PollHandle, PollOutcome,
    SubmissionOutcome,
};
use crate::capabilities::{try_query_capabilities, ChainCapabilities};
use crate::error::{RelayerError, RelayerResult};
use crate::explorer::{tx_url, ExplorerResolver};
use crate::wallet::{WalletEvent, WalletProvider, WalletSession};

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Explorer used until a chain-specific one is resolved
pub const DEFAULT_EXPLORER: &str = "https://gnosisscan.io/";

#[derive(Default)]
struct ControllerState {
    session: Option<WalletSession>,
    provider_name: Option<String>,
    capabilities: Option<ChainCapabilities>,
    sponsor: bool,
    loading: bool,
    pending: Option<PollHandle>,
    last_tx_hash: Option<String>,
    explorer_base: String,
    event_task: Option<JoinHandle<()>>,
    updated_at: Option<DateTime<Utc>>,
}

impl ControllerState {
    fn atomic_supported(&self) -> bool {
        crate::capabilities::is_atomic_supported(self.capabilities.as_ref())
    }

    fn paymaster_supported(&self) -> bool {
        crate::capabilities::is_paymaster_supported(self.capabilities.as_ref())
    }

    /// Drop everything scoped to the current account and chain
    fn invalidate_scoped(&mut self) {
        self.capabilities = None;
        self.last_tx_hash = None;
        self.sponsor = false;
        self.cancel_pending();
    }

    fn can_submit(&self) -> bool {
        self.session.is_some()
            && !self.loading
            && self.pending.is_none()
            && self.atomic_supported()
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    fn same_session(&self, address: Address, chain_id: u64) -> bool {
        self.session
            .as_ref()
            .map(|s| s.address == address && s.chain_id == chain_id)
            .unwrap_or(false)
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Read-only view of the controller
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub connected: bool,
    pub provider: Option<String>,
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub capabilities_loaded: bool,
    pub atomic_supported: bool,
    pub paymaster_supported: bool,
    pub sponsor: bool,
    pub loading: bool,
    pub can_submit: bool,
    pub pending_id: Option<String>,
    pub last_tx_hash: Option<String>,
    pub last_tx_url: Option<String>,
    pub explorer_base: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Drives connect, capability checks, submission and confirmation
pub struct BatchController {
    state: Arc<RwLock<ControllerState>>,
    notices: broadcast::Sender<Notice>,
    settled: Arc<Notify>,
    builder: BatchBuilder,
    poll_interval: Duration,
    explorer: Option<ExplorerResolver>,
}

impl BatchController {
    pub fn new(
        builder: BatchBuilder,
        poll_interval: Duration,
        explorer: Option<ExplorerResolver>,
    ) -> Self {
        let (notices, _) = broadcast::channel(256);
        let explorer_base = explorer
            .as_ref()
            .map(|e| e.fallback_url().to_string())
            .unwrap_or_else(|| DEFAULT_EXPLORER.to_string());

        Self {
            state: Arc::new(RwLock::new(ControllerState {
                explorer_base,
                ..Default::default()
            })),
            notices,
            settled: Arc::new(Notify::new()),
            builder,
            poll_interval,
            explorer,
        }
    }

    /// Subscribe to user-facing notices
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: Notice) {
        emit(&self.notices, notice);
    }

    /// Connect to a wallet, replacing any previous session
    pub async fn connect(
        self: &Arc<Self>,
        name: &str,
        provider: Arc<dyn WalletProvider>,
    ) -> RelayerResult<()> {
        let session = match WalletSession::connect(provider.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.notify(Notice::error(format!("Connect failed: {}", e)));
                return Err(e);
            }
        };

        info!(
            "Connected to {} as {} on chain {}",
            name,
            session.short_address(),
            session.chain_id
        );

        let explorer_base = match &self.explorer {
            Some(resolver) => resolver.resolve(session.chain_id).await,
            None => DEFAULT_EXPLORER.to_string(),
        };

        let event_task = provider
            .subscribe_events()
            .map(|events| spawn_event_forwarder(Arc::downgrade(self), events));

        {
            let mut state = self.state.write().await;
            if let Some(task) = state.event_task.take() {
                task.abort();
            }
            state.invalidate_scoped();
            state.session = Some(session);
            state.provider_name = Some(name.to_string());
            state.explorer_base = explorer_base;
            state.event_task = event_task;
            state.touch();
        }
        self.settled.notify_waiters();

        self.notify(Notice::success(format!("Connected: {}", name)));
        Ok(())
    }

    /// Forget the session and everything scoped to it
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.write().await;
            if let Some(task) = state.event_task.take() {
                task.abort();
            }
            state.invalidate_scoped();
            state.session = None;
            state.provider_name = None;
            state.touch();
        }
        self.settled.notify_waiters();

        self.notify(Notice::info("Disconnected."));
    }

    /// The wallet switched accounts
    pub async fn on_accounts_changed(&self, accounts: Vec<Address>) {
        let Some(account) = accounts.first().copied() else {
            info!("Wallet reported no accounts");
            self.disconnect().await;
            return;
        };

        {
            let mut state = self.state.write().await;
            let Some(session) = state.session.as_mut() else {
                return;
            };
            if session.address == account {
                return;
            }
            info!("Account changed to {:?}", account);
            session.address = account;
            state.invalidate_scoped();
            state.touch();
        }
        self.settled.notify_waiters();
    }

    /// The wallet switched chains
    pub async fn on_chain_changed(&self, chain_id: u64) {
        let changed = {
            let mut state = self.state.write().await;
            match state.session.as_mut() {
                Some(session) if session.chain_id != chain_id => {
                    info!("Chain changed to {}", chain_id);
                    session.chain_id = chain_id;
                    state.invalidate_scoped();
                    state.touch();
                    true
                }
                _ => false,
            }
        };

        if !changed {
            return;
        }
        self.settled.notify_waiters();

        if let Some(resolver) = &self.explorer {
            let base = resolver.resolve(chain_id).await;
            let mut state = self.state.write().await;
            if state.session.as_ref().map(|s| s.chain_id) == Some(chain_id) {
                state.explorer_base = base;
            }
        }
    }

    /// Ask the wallet what it supports on the current chain.
    ///
    /// A failed query is not an error: capabilities simply stay absent.
    pub async fn load_capabilities(&self) -> RelayerResult<Option<ChainCapabilities>> {
        let session = self.require_session().await?;

        let result =
            try_query_capabilities(session.provider.as_ref(), session.address, session.chain_id)
                .await;

        let mut state = self.state.write().await;
        if !state.same_session(session.address, session.chain_id) {
            debug!("Discarding capabilities for a stale session");
            return Ok(None);
        }

        let caps = match result {
            Ok(caps) => {
                crate::metrics::record_capability_query(session.chain_id, "ok");
                caps
            }
            Err(e) => {
                warn!("{}", e);
                crate::metrics::record_capability_query(session.chain_id, "error");
                state.capabilities = None;
                state.sponsor = false;
                state.touch();
                drop(state);
                self.notify(Notice::error("Failed to load capabilities."));
                return Ok(None);
            }
        };

        state.capabilities = caps.clone();
        if !state.paymaster_supported() {
            state.sponsor = false;
        }
        let atomic = state.atomic_supported();
        state.touch();
        drop(state);

        if atomic {
            self.notify(Notice::success("Atomic batch supported by your wallet."));
        } else {
            self.notify(Notice::error("Atomic batch NOT supported by your wallet."));
        }

        Ok(caps)
    }

    /// Toggle gas sponsorship; inert unless the wallet advertises a paymaster
    pub async fn set_sponsorship(&self, enabled: bool) -> bool {
        let mut state = self.state.write().await;
        if state.loading || !state.paymaster_supported() {
            debug!("Sponsorship toggle ignored");
            return state.sponsor;
        }
        state.sponsor = enabled;
        state.touch();
        enabled
    }

    /// Whether a submission would be accepted right now
    pub async fn can_submit(&self) -> bool {
        self.state.read().await.can_submit()
    }

    /// Build and submit an atomic batch; asynchronous batches start polling.
    ///
    /// Refused while a previous batch is still being polled.
    pub async fn send_batch(
        self: &Arc<Self>,
        inputs: &[CallInput],
    ) -> RelayerResult<SubmissionOutcome> {
        let (session, sponsor) = {
            let mut state = self.state.write().await;
            let current = state.session.clone();
            let Some(session) = current else {
                drop(state);
                return Err(self.reject(RelayerError::NotConnected));
            };
            if state.loading {
                return Err(RelayerError::SubmissionInFlight);
            }
            if let Some(pending) = state.pending.as_ref() {
                let id = pending.id().to_string();
                drop(state);
                return Err(self.reject(RelayerError::BatchPending { id }));
            }
            if !state.atomic_supported() {
                drop(state);
                return Err(self.reject(RelayerError::AtomicUnsupported {
                    chain_id: session.chain_id,
                }));
            }

            state.loading = true;
            state.last_tx_hash = None;
            state.touch();
            (session, state.sponsor)
        };
        self.settled.notify_waiters();

        let started = Instant::now();
        let result = match self
            .builder
            .build(session.chain_id, session.address, inputs, sponsor)
        {
            Ok(request) => submit_batch(session.provider.as_ref(), &request).await,
            Err(e) => Err(e),
        };

        let mut state = self.state.write().await;
        state.loading = false;
        state.touch();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(state);
                crate::metrics::record_batch_submitted(session.chain_id, "error");
                self.notify(Notice::error(e.to_string()));
                return Err(e);
            }
        };
        crate::metrics::record_submission_latency(session.chain_id, started.elapsed());

        if !state.same_session(session.address, session.chain_id) {
            warn!("Session changed while submitting; result not tracked");
            return Ok(outcome);
        }

        match &outcome {
            SubmissionOutcome::TransactionHash(hash) => {
                crate::metrics::record_batch_submitted(session.chain_id, "hash");
                crate::metrics::record_batch_confirmed(session.chain_id);
                state.last_tx_hash = Some(hash.clone());
                drop(state);
                self.notify(Notice::success(format!("Batch submitted: {}", hash)));
            }
            SubmissionOutcome::Pending(id) => {
                crate::metrics::record_batch_submitted(session.chain_id, "pending");
                let (handle, outcome_rx) = ConfirmationPoller::spawn(
                    session.provider.clone(),
                    id.clone(),
                    self.poll_interval,
                );
                state.pending = Some(handle);
                drop(state);
                self.spawn_outcome_applier(id.clone(), session.chain_id, outcome_rx);
                self.notify(Notice::info(
                    "Batch submitted, waiting for on-chain transaction.",
                ));
            }
            SubmissionOutcome::NoHashOrId => {
                crate::metrics::record_batch_submitted(session.chain_id, "none");
                drop(state);
                self.notify(Notice::warning("wallet_sendCalls returned no hash or id."));
            }
        }

        Ok(outcome)
    }

    /// Resolve once no batch is pending
    pub async fn wait_until_settled(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.read().await.pending.is_none() {
                return;
            }
            notified.await;
        }
    }

    /// Stop polling and event forwarding
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if let Some(task) = state.event_task.take() {
            task.abort();
        }
        state.cancel_pending();
        drop(state);
        self.settled.notify_waiters();
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.state.read().await;
        let can_submit = state.can_submit();

        ControllerStatus {
            connected: state.session.is_some(),
            provider: state.provider_name.clone(),
            account: state.session.as_ref().map(|s| s.address),
            chain_id: state.session.as_ref().map(|s| s.chain_id),
            capabilities_loaded: state.capabilities.is_some(),
            atomic_supported: state.atomic_supported(),
            paymaster_supported: state.paymaster_supported(),
            sponsor: state.sponsor,
            loading: state.loading,
            can_submit,
            pending_id: state.pending.as_ref().map(|h| h.id().to_string()),
            last_tx_hash: state.last_tx_hash.clone(),
            last_tx_url: state
                .last_tx_hash
                .as_ref()
                .map(|hash| tx_url(&state.explorer_base, hash)),
            explorer_base: state.explorer_base.clone(),
            updated_at: state.updated_at,
        }
    }

    async fn require_session(&self) -> RelayerResult<WalletSession> {
        let session = self.state.read().await.session.clone();
        session.ok_or_else(|| self.reject(RelayerError::NotConnected))
    }

    fn reject(&self, error: RelayerError) -> RelayerError {
        self.notify(Notice::error(error.to_string()));
        error
    }

    fn spawn_outcome_applier(
        &self,
        id: BatchId,
        chain_id: u64,
        outcome_rx: oneshot::Receiver<PollOutcome>,
    ) {
        let state = self.state.clone();
        let notices = self.notices.clone();
        let settled = self.settled.clone();

        tokio::spawn(async move {
            // Cancelled pollers drop their sender
            let Ok(outcome) = outcome_rx.await else {
                return;
            };

            let mut state = state.write().await;
            if state.pending.as_ref().map(|h| h.id()) != Some(&id) {
                debug!("Discarding outcome of stale batch {}", id);
                return;
            }
            state.pending = None;
            state.touch();

            let notice = match outcome {
                PollOutcome::Confirmed(hash) => {
                    crate::metrics::record_batch_confirmed(chain_id);
                    state.last_tx_hash = Some(hash);
                    Notice::success("Batch executed on-chain.")
                }
                PollOutcome::Failed(code) => {
                    crate::metrics::record_batch_failed(chain_id);
                    Notice::error(format!("Batch failed (status {}).", code))
                }
            };
            drop(state);

            emit(&notices, notice);
            settled.notify_waiters();
        });
    }
}

fn emit(notices: &broadcast::Sender<Notice>, notice: Notice) {
    notice.log();
    // No subscribers is fine
    let _ = notices.send(notice);
}

fn spawn_event_forwarder(
    controller: Weak<BatchController>,
    mut events: broadcast::Receiver<WalletEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} wallet events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(controller) = controller.upgrade() else {
                break;
            };

            match event {
                WalletEvent::AccountsChanged(accounts) => {
                    controller.on_accounts_changed(accounts).await
                }
                WalletEvent::ChainChanged(chain_id) => controller.on_chain_changed(chain_id).await,
            }
        }
    })
}
