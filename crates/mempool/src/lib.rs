pub mod tx;
pub mod utxo;

use anyhow::{anyhow, Result};
use bitcoin::{Amount, OutPoint};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const MEMPOOL_URL: &str = "https://mempool.space";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin client for an esplora-compatible REST api.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    base_url: String,
    client: Client,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn mainnet() -> Result<Self> {
        Self::new(MEMPOOL_URL)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}
