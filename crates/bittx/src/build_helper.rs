use anyhow::{anyhow, Result};
use crate::builder::purchase::{build_purchase, MarketParams, SaleTerms};
use mempool::EsploraClient;

use super::*;

/// Fetches the buyer's confirmed coins and drafts the purchase psbt.
pub async fn build_purchase_draft(
    client: &EsploraClient,
    listing: &Psbt,
    terms: &SaleTerms,
    buyer_address: &Address,
    fee_rate: f64,
    params: &MarketParams,
) -> Result<Psbt> {
    let utxos = client.gets_unspent_utxo(buyer_address).await?;
    if utxos.is_empty() {
        return Err(anyhow!("not found unspent utxo for {}", buyer_address));
    }

    let psbt = select_and_build(listing, terms, utxos, buyer_address, fee_rate, params)?;
    Ok(psbt)
}

/// Adds buyer coins largest first until the purchase is funded.
pub fn select_and_build(
    listing: &Psbt,
    terms: &SaleTerms,
    mut candidates: Vec<types::Utxo>,
    buyer_address: &Address,
    fee_rate: f64,
    params: &MarketParams,
) -> Result<Psbt, SwapError> {
    let asset = listing.unsigned_tx.input.first().map(|i| i.previous_output);
    candidates.retain(|u| Some(u.out_point) != asset);
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut last_err = SwapError::InsufficientFunds {
        shortfall: terms.price.to_sat(),
    };
    for take in 1..=candidates.len() {
        match build_purchase(listing, terms, &candidates[..take], buyer_address, fee_rate, params) {
            Ok(psbt) => {
                debug!("purchase funded with {} buyer inputs", take);
                return Ok(psbt);
            }
            Err(e @ SwapError::InsufficientFunds { .. }) => last_err = e,
            Err(e) => return Err(e),
        }
    }

    Err(last_err)
}
