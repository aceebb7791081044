use std::str::FromStr;

use super::*;
use bitcoin::Address;
use datatypes::types;

#[derive(Debug, Deserialize)]
struct Utxo {
    txid: String,
    vout: u32,
    value: u64,
    status: TxStatus,
}

impl EsploraClient {
    /// Confirmed unspent outputs of `address`.
    pub async fn gets_unspent_utxo(&self, address: &Address) -> Result<Vec<types::Utxo>> {
        self.gets_utxo(address, true).await
    }

    pub async fn gets_utxo(&self, address: &Address, confirmed: bool) -> Result<Vec<types::Utxo>> {
        let url = self.url(&format!("address/{}/utxo", address));
        debug!("{}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        parse_utxos(&body, address, confirmed)
    }
}

fn parse_utxos(body: &str, address: &Address, confirmed: bool) -> Result<Vec<types::Utxo>> {
    let utxos: Vec<Utxo> = serde_json::from_str(body)?;

    let mut my_utxos = Vec::with_capacity(utxos.len());
    for utxo in utxos {
        if confirmed && !utxo.status.confirmed {
            continue;
        }
        let out_point = OutPoint::from_str(&format!("{}:{}", utxo.txid, utxo.vout))
            .map_err(|e| anyhow!("bad outpoint {}:{}: {}", utxo.txid, utxo.vout, e))?;
        my_utxos.push(types::Utxo {
            out_point,
            value: Amount::from_sat(utxo.value),
            script_pubkey: address.script_pubkey(),
        });
    }

    Ok(my_utxos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    const BODY: &str = r#"[
        {"txid":"1111111111111111111111111111111111111111111111111111111111111111","vout":0,"value":20000,
         "status":{"confirmed":true,"block_height":800000,"block_hash":"00","block_time":1700000000}},
        {"txid":"2222222222222222222222222222222222222222222222222222222222222222","vout":3,"value":5000,
         "status":{"confirmed":false}}
    ]"#;

    fn address() -> Address {
        Address::from_str("bc1qdx5yz3j59mgk6tfcedcn0ekud4exlg88s893j8")
            .unwrap()
            .require_network(Network::Bitcoin)
            .unwrap()
    }

    #[test]
    fn confirmed_filter_drops_mempool_outputs() {
        let utxos = parse_utxos(BODY, &address(), true).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value.to_sat(), 20_000);
        assert_eq!(utxos[0].out_point.vout, 0);
        assert_eq!(utxos[0].script_pubkey, address().script_pubkey());

        let all = parse_utxos(BODY, &address(), false).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse_utxos("not json", &address(), true).is_err());
    }
}
