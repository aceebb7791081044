use super::*;
use bitcoin::{OutPoint, ScriptBuf};
use bitcoincore_rpc::{jsonrpc, Auth, Client, RpcApi};

/// RPC error code bitcoind returns for a txid it has never seen.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

pub struct BtcCli {
    rpc: Client,
}

impl BtcCli {
    pub fn new(url: &str, user: &str, pass: &str) -> Result<Self> {
        let rpc = Client::new(url, Auth::UserPass(user.to_string(), pass.to_string()))
            .map_err(|e| anyhow!("connect to node {} failed: {}", url, e))?;
        Ok(Self { rpc })
    }

    pub fn get_best_block_height(&self) -> Result<u64> {
        self.rpc
            .get_block_count()
            .map_err(|e| anyhow!("Failed to fetch block count: {:?}", e))
    }

    /// The asset output as it sits in the utxo set, `None` once spent.
    pub fn get_unspent_utxo(&self, out_point: &OutPoint) -> Result<Option<types::Utxo>> {
        match self
            .rpc
            .get_tx_out(&out_point.txid, out_point.vout, Some(true))
        {
            Ok(Some(txout)) => {
                let script_pubkey = ScriptBuf::from(txout.script_pub_key.hex);
                debug!("TxOut value: {}", txout.value);
                Ok(Some(types::Utxo {
                    out_point: *out_point,
                    value: txout.value,
                    script_pubkey,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow!("Error fetching TxOut {}: {}", out_point, e)),
        }
    }

    pub fn send_raw_tx(&self, raw: &[u8]) -> Result<Txid> {
        self.rpc
            .send_raw_transaction(raw)
            .map_err(|e| anyhow!("send tx to node failed: {}", e))
    }

    /// Whether the node has `txid` in its mempool or (with txindex) a block.
    pub fn is_known(&self, txid: &Txid) -> Result<bool> {
        match self.rpc.get_raw_transaction_info(txid, None) {
            Ok(_) => Ok(true),
            Err(bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)))
                if e.code == RPC_INVALID_ADDRESS_OR_KEY =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow!("Error fetching raw transaction: {}", e)),
        }
    }
}
