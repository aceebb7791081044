pub mod tx;

#[cfg(test)]
pub(crate) mod mock;

use super::*;
use crate::btcrpc::BtcCli;
use async_trait::async_trait;
use mempool::EsploraClient;

/// One place a raw transaction can be submitted to.
#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, raw: &[u8]) -> Result<Txid>;

    async fn is_known(&self, txid: &Txid) -> Result<bool>;
}

/// The operator's own node. RPC calls block, so they run on the blocking pool.
pub struct NodeRelay {
    cli: Arc<BtcCli>,
}

impl NodeRelay {
    pub fn new(cli: Arc<BtcCli>) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl TxBroadcaster for NodeRelay {
    fn name(&self) -> &str {
        "node"
    }

    async fn submit(&self, raw: &[u8]) -> Result<Txid> {
        let cli = Arc::clone(&self.cli);
        let raw = raw.to_vec();
        tokio::task::spawn_blocking(move || cli.send_raw_tx(&raw)).await?
    }

    async fn is_known(&self, txid: &Txid) -> Result<bool> {
        let cli = Arc::clone(&self.cli);
        let txid = *txid;
        tokio::task::spawn_blocking(move || cli.is_known(&txid)).await?
    }
}

/// A public esplora-compatible relay.
pub struct EsploraRelay {
    name: String,
    client: EsploraClient,
}

impl EsploraRelay {
    pub fn new(name: &str, url: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: EsploraClient::new(url)?,
        })
    }
}

#[async_trait]
impl TxBroadcaster for EsploraRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, raw: &[u8]) -> Result<Txid> {
        let tx_hex = hex::encode(raw);
        self.client.send_tx(&tx_hex).await
    }

    async fn is_known(&self, txid: &Txid) -> Result<bool> {
        self.client.is_known(txid).await
    }
}

/// Rejections that mean the network already has the transaction.
pub fn is_already_known(err: &str) -> bool {
    let err = err.to_lowercase();
    [
        "txn-already-in-mempool",
        "txn-already-known",
        "already in block chain",
        "outputs already in utxo set",
    ]
    .iter()
    .any(|pattern| err.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_known_replies_are_recognised() {
        assert!(is_already_known("sendrawtransaction RPC error: {\"code\":-27,\"message\":\"Transaction already in block chain\"}"));
        assert!(is_already_known("400 sendrawtransaction RPC error: {\"code\":-26,\"message\":\"txn-already-in-mempool\"}"));
        assert!(!is_already_known("400 bad-txns-inputs-missingorspent"));
        assert!(!is_already_known("min relay fee not met"));
    }
}
