//! Wallet provider discovery
//!
//! Wallets announce themselves on a shared broadcast bus. The registry sends a
//! single discovery request when it starts and then collects every distinct
//! announcement, keyed by the provider uuid.

use super::WalletProvider;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Uuid under which a pre-configured wallet is registered
pub const DEFAULT_PROVIDER_UUID: &str = "default";

/// Descriptive metadata of an announced wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
}

/// A wallet together with its metadata
#[derive(Clone)]
pub struct ProviderAnnouncement {
    pub info: ProviderInfo,
    pub provider: Arc<dyn WalletProvider>,
}

impl std::fmt::Debug for ProviderAnnouncement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAnnouncement")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Messages exchanged on the discovery bus
#[derive(Debug, Clone)]
pub enum RegistryMessage {
    /// Ask every listening wallet to announce itself
    RequestProviders,
    Announce(ProviderAnnouncement),
}

/// Collects distinct wallet providers in announcement order
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, (usize, ProviderAnnouncement)>,
    next_seq: AtomicUsize,
    announced: Notify,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the bus, broadcast one discovery request and collect announcements
    pub fn start(self: &Arc<Self>, bus: &broadcast::Sender<RegistryMessage>) -> JoinHandle<()> {
        // Subscribe before requesting so no announcement is missed
        let mut rx = bus.subscribe();

        if bus.send(RegistryMessage::RequestProviders).is_err() {
            debug!("No wallets listening for discovery requests");
        }

        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(RegistryMessage::Announce(announcement)) => {
                        registry.register(announcement);
                    }
                    Ok(RegistryMessage::RequestProviders) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Provider registry lagged, {} announcements dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Register an announced provider; returns false if its uuid is already known
    pub fn register(&self, announcement: ProviderAnnouncement) -> bool {
        match self.providers.entry(announcement.info.uuid.clone()) {
            Entry::Occupied(entry) => {
                debug!("Ignoring duplicate provider announcement {}", entry.key());
                false
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Discovered wallet provider {} ({})",
                    announcement.info.name,
                    entry.key()
                );
                entry.insert((seq, announcement));
                self.announced.notify_waiters();
                true
            }
        }
    }

    /// Wait up to `window` for the first provider to be known; false on timeout
    pub async fn wait_for_providers(&self, window: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.announced.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if !self.providers.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(window, wait).await.is_ok()
    }

    /// Register a pre-configured wallet unless the same provider was already announced
    pub fn register_default(&self, name: &str, provider: Arc<dyn WalletProvider>) -> bool {
        let already_listed = self
            .providers
            .iter()
            .any(|entry| same_provider(&entry.value().1.provider, &provider));

        if already_listed {
            return false;
        }

        self.register(ProviderAnnouncement {
            info: ProviderInfo {
                uuid: DEFAULT_PROVIDER_UUID.to_string(),
                name: name.to_string(),
                icon: String::new(),
            },
            provider,
        })
    }

    /// All known providers in the order they were first announced
    pub fn providers(&self) -> Vec<ProviderAnnouncement> {
        let mut entries: Vec<_> = self
            .providers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, announcement)| announcement).collect()
    }

    /// Look up a provider by uuid
    pub fn get(&self, uuid: &str) -> Option<ProviderAnnouncement> {
        self.providers.get(uuid).map(|entry| entry.value().1.clone())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Announce a wallet on the bus now and again on every discovery request
pub fn announce(
    bus: &broadcast::Sender<RegistryMessage>,
    announcement: ProviderAnnouncement,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let bus = bus.clone();

    tokio::spawn(async move {
        // Nobody may be listening yet; the next request triggers a resend
        let _ = bus.send(RegistryMessage::Announce(announcement.clone()));

        loop {
            match rx.recv().await {
                Ok(RegistryMessage::RequestProviders) => {
                    debug!("Announcing wallet provider {}", announcement.info.name);
                    let _ = bus.send(RegistryMessage::Announce(announcement.clone()));
                }
                Ok(RegistryMessage::Announce(_)) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn same_provider(a: &Arc<dyn WalletProvider>, b: &Arc<dyn WalletProvider>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedWallet;
    use std::time::Duration;

    fn announcement(uuid: &str, name: &str) -> ProviderAnnouncement {
        ProviderAnnouncement {
            info: ProviderInfo {
                uuid: uuid.to_string(),
                name: name.to_string(),
                icon: String::new(),
            },
            provider: Arc::new(ScriptedWallet::new()),
        }
    }

    #[test]
    fn test_deduplicates_by_uuid() {
        let registry = ProviderRegistry::new();
        assert!(registry.register(announcement("a", "Alpha")));
        assert!(!registry.register(announcement("a", "Alpha again")));
        assert!(registry.register(announcement("b", "Beta")));

        let names: Vec<_> = registry.providers().into_iter().map(|p| p.info.name).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn test_default_provider_not_duplicated() {
        let registry = ProviderRegistry::new();
        let shared: Arc<dyn WalletProvider> = Arc::new(ScriptedWallet::new());
        registry.register(ProviderAnnouncement {
            info: ProviderInfo {
                uuid: "injected-1".to_string(),
                name: "Injected".to_string(),
                icon: String::new(),
            },
            provider: shared.clone(),
        });

        assert!(!registry.register_default("Local signer", shared));
        assert!(registry.register_default("Other", Arc::new(ScriptedWallet::new())));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(DEFAULT_PROVIDER_UUID).is_some());
    }

    #[tokio::test]
    async fn test_start_requests_and_collects_announcements() {
        let (bus, _) = broadcast::channel(16);

        // A wallet that answers discovery requests
        let mut wallet_rx = bus.subscribe();
        let wallet_bus = bus.clone();
        tokio::spawn(async move {
            while let Ok(message) = wallet_rx.recv().await {
                if matches!(message, RegistryMessage::RequestProviders) {
                    let _ = wallet_bus.send(RegistryMessage::Announce(announcement("w1", "Wallet")));
                    let _ = wallet_bus.send(RegistryMessage::Announce(announcement("w1", "Wallet")));
                }
            }
        });

        let registry = Arc::new(ProviderRegistry::new());
        let _handle = registry.start(&bus);

        for _ in 0..50 {
            if !registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.providers()[0].info.uuid, "w1");
    }

    #[tokio::test]
    async fn test_announced_wallet_preferred_over_default() {
        let (bus, _) = broadcast::channel(16);
        let wallet: Arc<dyn WalletProvider> = Arc::new(ScriptedWallet::new());
        let _announcer = announce(
            &bus,
            ProviderAnnouncement {
                info: ProviderInfo {
                    uuid: "rpc-1".to_string(),
                    name: "Announced".to_string(),
                    icon: String::new(),
                },
                provider: wallet.clone(),
            },
        );

        let registry = Arc::new(ProviderRegistry::new());
        let _handle = registry.start(&bus);

        assert!(registry.wait_for_providers(Duration::from_secs(1)).await);
        assert!(!registry.register_default("Fallback", wallet));
        assert!(registry.register_default("Other", Arc::new(ScriptedWallet::new())));

        let names: Vec<_> = registry.providers().into_iter().map(|p| p.info.name).collect();
        assert_eq!(names, vec!["Announced", "Other"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_window_elapses_without_wallets() {
        let (bus, _) = broadcast::channel(16);
        let registry = Arc::new(ProviderRegistry::new());
        let _handle = registry.start(&bus);

        assert!(!registry.wait_for_providers(Duration::from_millis(500)).await);
        assert!(registry.is_empty());
    }
}
