use super::*;
use bitcoin::consensus::encode::deserialize;
use datatypes::BroadcastAttempt;

/// Ranked broadcast providers, primary node first.
pub struct TxSender {
    providers: Vec<Box<dyn TxBroadcaster>>,
}

impl TxSender {
    pub fn new(providers: Vec<Box<dyn TxBroadcaster>>) -> Self {
        Self { providers }
    }

    pub async fn from_config(cfg: &config::Config, node: Arc<BtcCli>) -> Result<Self> {
        let mut providers: Vec<Box<dyn TxBroadcaster>> = vec![Box::new(NodeRelay::new(node))];
        for relay in &cfg.broadcast.relays {
            providers.push(Box::new(EsploraRelay::new(&relay.name, &relay.url)?));
        }
        info!("broadcast providers: {}", provider_names(&providers));
        Ok(Self::new(providers))
    }

    /// Submits to each provider in order, the first success wins.
    pub async fn broadcast(&self, raw: &[u8]) -> Result<Txid, SwapError> {
        let tx: Transaction = deserialize(raw)
            .map_err(|e| SwapError::InvalidPsbt(format!("raw transaction does not decode: {e}")))?;
        let expected = tx.compute_txid();
        debug!("broadcasting {} ({} bytes)", expected, raw.len());

        let mut attempts = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.submit(raw).await {
                Ok(txid) if txid == expected => {
                    info!("{} accepted {}", provider.name(), txid);
                    return Ok(txid);
                }
                Ok(txid) => {
                    warn!("{} answered {} for {}", provider.name(), txid, expected);
                    attempts.push(BroadcastAttempt {
                        provider: provider.name().to_string(),
                        error: format!("returned unexpected txid {txid}"),
                    });
                }
                Err(e) if is_already_known(&e.to_string()) => {
                    info!("{} already has {}", provider.name(), expected);
                    return Ok(expected);
                }
                Err(e) => {
                    warn!("{} rejected {}: {}", provider.name(), expected, e);
                    attempts.push(BroadcastAttempt {
                        provider: provider.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        error!("every provider failed for {}", expected);
        Err(SwapError::BroadcastExhausted(attempts))
    }

    /// True if any provider already sees `txid`. Lookup failures count as unknown.
    pub async fn is_known(&self, txid: &Txid) -> bool {
        for provider in &self.providers {
            match provider.is_known(txid).await {
                Ok(true) => {
                    debug!("{} already knows {}", provider.name(), txid);
                    return true;
                }
                Ok(false) => {}
                Err(e) => debug!("{} status lookup for {} failed: {}", provider.name(), txid, e),
            }
        }
        false
    }
}

fn provider_names(providers: &[Box<dyn TxBroadcaster>]) -> String {
    providers
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}
