//! Batch Relayer - EIP-5792 atomic batch submission
//!
//! Connects to a wallet, checks that it can execute calls atomically on the
//! current chain, submits one batch and follows it until it lands on chain.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod api;
mod batch;
mod capabilities;
mod config;
mod controller;
mod error;
mod explorer;
mod metrics;
mod wallet;

#[cfg(test)]
mod test_utils;

use batch::{BatchBuilder, CallInput};
use config::Settings;
use controller::BatchController;
use explorer::{tx_url, ExplorerResolver};
use metrics::MetricsServer;
use wallet::{ProviderAnnouncement, ProviderInfo, ProviderRegistry, RpcWallet, WalletProvider};

const RPC_WALLET_NAME: &str = "JSON-RPC wallet";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Batch Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration with {} wallet endpoints and {} calls",
        settings.wallet.rpc_urls.len(),
        settings.batch.calls.len()
    );

    // Discover wallets; the configured endpoint answers discovery like any other
    let rpc_wallet: Arc<dyn WalletProvider> = Arc::new(RpcWallet::new(&settings.wallet)?);
    let (bus, _) = broadcast::channel(16);
    let announcer_handle = wallet::announce(
        &bus,
        ProviderAnnouncement {
            info: ProviderInfo {
                uuid: format!("rpc:{}", settings.wallet.rpc_urls[0]),
                name: RPC_WALLET_NAME.to_string(),
                icon: String::new(),
            },
            provider: rpc_wallet.clone(),
        },
    );

    let registry = Arc::new(ProviderRegistry::new());
    let discovery_handle = registry.start(&bus);
    if !registry
        .wait_for_providers(settings.wallet.discovery_window())
        .await
    {
        warn!("No wallet announced itself, using the configured endpoint");
    }
    registry.register_default(RPC_WALLET_NAME, rpc_wallet);

    let announcement = registry
        .providers()
        .into_iter()
        .next()
        .context("No wallet provider available")?;
    info!(
        "{} wallet provider(s) discovered, connecting to {}",
        registry.len(),
        announcement.info.name
    );

    let explorer = match ExplorerResolver::new(settings.explorer.clone()) {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            warn!("Explorer lookup disabled: {}", e);
            None
        }
    };

    let controller = Arc::new(BatchController::new(
        BatchBuilder::new(settings.batch.version.clone()),
        settings.batch.poll_interval(),
        explorer,
    ));

    // Start metrics server
    let metrics_handle = settings.metrics.enabled.then(|| {
        let server = MetricsServer::new(settings.metrics.port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start API server
    let api_handle = settings.api.enabled.then(|| {
        let config = settings.api.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = api::run_server(config, controller).await {
                error!("API server error: {}", e);
            }
        })
    });

    controller
        .connect(&announcement.info.name, announcement.provider.clone())
        .await?;
    controller.load_capabilities().await?;

    if settings.batch.sponsor && !controller.set_sponsorship(true).await {
        warn!("Wallet offers no paymaster service; submitting without sponsorship");
    }

    let inputs: Vec<CallInput> = settings.batch.calls.iter().map(CallInput::from).collect();

    let result = match controller.send_batch(&inputs).await {
        Ok(_) => {
            tokio::select! {
                _ = controller.wait_until_settled() => {},
                _ = shutdown_signal() => info!("Shutdown signal received, stopping..."),
            }
            Ok(())
        }
        Err(e) if e.is_guard() => {
            warn!("Batch not submitted: {}", e);
            Err(e)
        }
        Err(e) => {
            error!("Batch submission failed: {}", e);
            Err(e)
        }
    };

    let status = controller.status().await;
    if let Some(hash) = &status.last_tx_hash {
        info!("Transaction: {}", tx_url(&status.explorer_base, hash));
    }

    // Graceful shutdown
    controller.shutdown().await;
    discovery_handle.abort();
    announcer_handle.abort();
    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Batch Relayer stopped");
    result?;
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,batch_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
