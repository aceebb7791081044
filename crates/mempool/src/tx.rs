use std::str::FromStr;

use super::*;
use bitcoin::Txid;
use reqwest::StatusCode;

impl EsploraClient {
    /// Submits raw tx hex, returns the txid the server echoes back.
    pub async fn send_tx(&self, tx_hex: &str) -> Result<Txid> {
        let response = self
            .client
            .post(self.url("tx"))
            .body(tx_hex.to_string())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("{} {}", status.as_u16(), body.trim()));
        }

        debug!("{} accepted tx {}", self.base_url, body.trim());
        Txid::from_str(body.trim()).map_err(|e| anyhow!("unexpected reply {}: {}", body.trim(), e))
    }

    /// Status of `txid`, `None` when the server has never seen it.
    pub async fn tx_status(&self, txid: &Txid) -> Result<Option<TxStatus>> {
        let response = self
            .client
            .get(self.url(&format!("tx/{}/status", txid)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.error_for_status()?.json::<TxStatus>().await?;
        Ok(Some(status))
    }

    pub async fn is_known(&self, txid: &Txid) -> Result<bool> {
        Ok(self.tx_status(txid).await?.is_some())
    }
}
