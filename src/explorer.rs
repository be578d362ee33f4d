//! Block explorer lookup from the public chain list

use crate::config::ExplorerConfig;
use crate::error::{RelayerError, RelayerResult};

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainListEntry {
    pub chain_id: u64,
    #[serde(default)]
    pub explorers: Vec<ChainExplorer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainExplorer {
    #[serde(default)]
    pub url: String,
}

/// Resolves the explorer base url for a chain
pub struct ExplorerResolver {
    client: reqwest::Client,
    config: ExplorerConfig,
}

impl ExplorerResolver {
    pub fn new(config: ExplorerConfig) -> RelayerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayerError::Explorer(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn fallback_url(&self) -> &str {
        &self.config.fallback_url
    }

    /// Explorer base url for `chain_id`, or the configured fallback
    pub async fn resolve(&self, chain_id: u64) -> String {
        match self.try_resolve(chain_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("No explorer listed for chain {}, using fallback", chain_id);
                self.config.fallback_url.clone()
            }
            Err(e) => {
                warn!("{}", e);
                self.config.fallback_url.clone()
            }
        }
    }

    pub async fn try_resolve(&self, chain_id: u64) -> RelayerResult<Option<String>> {
        let response = self
            .client
            .get(&self.config.chain_list_url)
            .send()
            .await
            .map_err(|e| RelayerError::Explorer(format!("chain list request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RelayerError::Explorer(format!(
                "chain list returned {}",
                response.status()
            )));
        }

        let rows: Vec<ChainListEntry> = response
            .json()
            .await
            .map_err(|e| RelayerError::Explorer(format!("chain list was not valid JSON: {}", e)))?;

        Ok(find_explorer(&rows, chain_id))
    }
}

/// First explorer url listed for `chain_id`
pub fn find_explorer(rows: &[ChainListEntry], chain_id: u64) -> Option<String> {
    rows.iter()
        .find(|row| row.chain_id == chain_id)
        .and_then(|row| row.explorers.first())
        .map(|explorer| explorer.url.clone())
        .filter(|url| !url.is_empty())
}

/// Link to a transaction on an explorer
pub fn tx_url(base: &str, tx_hash: &str) -> String {
    format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash)
}
