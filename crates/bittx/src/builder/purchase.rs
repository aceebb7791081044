use super::*;

/// What happens to a change remainder that is positive but below dust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangePolicy {
    /// Emit the change output at exactly the dust limit, paid out of the miner fee.
    #[default]
    PinToDust,
    /// Drop the change output, the remainder goes to the miner.
    FoldIntoFee,
}

impl FromStr for ChangePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pin_to_dust" => Ok(ChangePolicy::PinToDust),
            "fold_into_fee" => Ok(ChangePolicy::FoldIntoFee),
            other => Err(anyhow::anyhow!("unknown change policy {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketParams {
    pub fee_address: Address,
    /// Platform fee in basis points of the price.
    pub fee_bps: u64,
    pub dust_limit: u64,
    pub change_policy: ChangePolicy,
}

/// Seller terms the purchase must pay out on output[0].
#[derive(Debug, Clone)]
pub struct SaleTerms {
    pub seller_address: Address,
    pub price: Amount,
}

impl SaleTerms {
    pub fn payment_output(&self) -> TxOut {
        TxOut {
            value: self.price,
            script_pubkey: self.seller_address.script_pubkey(),
        }
    }
}

pub fn platform_fee(price: Amount, fee_bps: u64, dust_limit: u64) -> Amount {
    let fee = price.to_sat().saturating_mul(fee_bps) / 10_000;
    Amount::from_sat(fee.max(dust_limit))
}

/// Combines a listing with buyer coins.
///
/// Output order is fixed: seller payment, asset to buyer, platform fee, then
/// optional change to buyer.
pub fn build_purchase(
    listing: &Psbt,
    terms: &SaleTerms,
    buyer_utxos: &[types::Utxo],
    buyer_address: &Address,
    fee_rate: f64,
    params: &MarketParams,
) -> Result<Psbt, SwapError> {
    if listing.unsigned_tx.input.len() != 1 || listing.inputs.len() != 1 {
        return Err(SwapError::InvalidPsbt(
            "listing must spend exactly one input".to_string(),
        ));
    }
    let asset = listing.inputs[0]
        .witness_utxo
        .clone()
        .ok_or_else(|| SwapError::InvalidPsbt("listing input has no witness utxo".to_string()))?;
    if !fee_rate.is_finite() || fee_rate <= 0.0 {
        return Err(SwapError::InvalidPsbt(format!("invalid fee rate {fee_rate}")));
    }

    let mut outputs = vec![
        terms.payment_output(),
        TxOut {
            value: asset.value,
            script_pubkey: buyer_address.script_pubkey(),
        },
        TxOut {
            value: platform_fee(terms.price, params.fee_bps, params.dust_limit),
            script_pubkey: params.fee_address.script_pubkey(),
        },
    ];

    let input_total: u64 = asset.value.to_sat()
        + buyer_utxos.iter().map(|u| u.value.to_sat()).sum::<u64>();
    let change = calc_change_amount(input_total, &outputs, 1 + buyer_utxos.len(), fee_rate, params)?;
    if buyer_utxos.is_empty() {
        return Err(SwapError::InvalidPsbt(
            "purchase needs at least one buyer input".to_string(),
        ));
    }
    if let Some(change) = change {
        outputs.push(TxOut {
            value: change,
            script_pubkey: buyer_address.script_pubkey(),
        });
    }

    let mut tx_ins = vec![listing.unsigned_tx.input[0].clone()];
    for utxo in buyer_utxos {
        tx_ins.push(unsigned_input(utxo.out_point));
    }

    let tx = empty_tx(tx_ins, outputs);
    let mut psbt =
        Psbt::from_unsigned_tx(tx).map_err(|e| SwapError::InvalidPsbt(e.to_string()))?;

    let mut seller_input = listing.inputs[0].clone();
    seller_input.tap_key_sig = None;
    seller_input.final_script_witness = None;
    psbt.inputs[0] = seller_input;
    for (idx, utxo) in buyer_utxos.iter().enumerate() {
        psbt.inputs[idx + 1].witness_utxo = Some(utxo.tx_out());
    }

    info!(
        "built purchase draft: {} inputs, {} outputs, total in {} sats",
        psbt.unsigned_tx.input.len(),
        psbt.unsigned_tx.output.len(),
        input_total
    );
    Ok(psbt)
}

/// Change owed to the buyer, or `None` when it is folded into the miner fee.
fn calc_change_amount(
    input_total: u64,
    outputs: &[TxOut],
    input_count: usize,
    fee_rate: f64,
    params: &MarketParams,
) -> Result<Option<Amount>, SwapError> {
    let output_total = outputs.iter().map(|out| out.value.to_sat()).sum::<u64>() as i128;
    let input_total = input_total as i128;
    let dust = params.dust_limit as i128;

    let with_change = vsize::estimate_vsize(input_count, outputs.len() + 1);
    let fee_with_change = vsize::miner_fee(with_change, fee_rate) as i128;
    let remainder = input_total - output_total - fee_with_change;
    if remainder >= dust {
        return Ok(Some(Amount::from_sat(remainder as u64)));
    }

    let without_change = vsize::estimate_vsize(input_count, outputs.len());
    let fee_without_change = vsize::miner_fee(without_change, fee_rate) as i128;
    let remainder = input_total - output_total - fee_without_change;
    if remainder < 0 {
        return Err(SwapError::InsufficientFunds {
            shortfall: (-remainder) as u64,
        });
    }

    match params.change_policy {
        ChangePolicy::FoldIntoFee => {
            debug!("folding {} sats of change into the miner fee", remainder);
            Ok(None)
        }
        ChangePolicy::PinToDust if remainder == 0 => Ok(None),
        ChangePolicy::PinToDust => {
            // the miner fee shrinks to fund the pinned output, but never below 1 sat/vB
            let min_relay_fee = with_change as i128;
            let miner_fee = input_total - output_total - dust;
            if miner_fee < min_relay_fee {
                return Err(SwapError::InsufficientFunds {
                    shortfall: (min_relay_fee - miner_fee) as u64,
                });
            }
            warn!(
                "change of {} sats pinned to dust limit {}",
                remainder, params.dust_limit
            );
            Ok(Some(Amount::from_sat(params.dust_limit)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::listing::build_listing;
    use crate::keys::InternalKey;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::OutPoint;
    use secp256k1::Secp256k1;

    struct Fixture {
        listing: Psbt,
        terms: SaleTerms,
        buyer: Address,
        params: MarketParams,
    }

    fn address(seed: u8) -> Address {
        let internal = InternalKey::from_secret(SecretKey::from_slice(&[seed; 32]).unwrap());
        Address::p2tr(&Secp256k1::new(), internal.x_only, None, Network::Regtest)
    }

    fn fixture(policy: ChangePolicy) -> Fixture {
        let seller_key = InternalKey::from_secret(SecretKey::from_slice(&[1u8; 32]).unwrap());
        let seller = address(1);
        let asset = types::Utxo {
            out_point: OutPoint::from_str(
                "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:0",
            )
            .unwrap(),
            value: Amount::from_sat(546),
            script_pubkey: seller.script_pubkey(),
        };
        let listing = build_listing(&asset, &seller, seller_key.x_only).unwrap();
        Fixture {
            listing: listing.psbt,
            terms: SaleTerms {
                seller_address: seller,
                price: Amount::from_sat(10_000),
            },
            buyer: address(2),
            params: MarketParams {
                fee_address: address(3),
                fee_bps: 200,
                dust_limit: 546,
                change_policy: policy,
            },
        }
    }

    fn buyer_utxo(fx: &Fixture, value: u64) -> types::Utxo {
        types::Utxo {
            out_point: OutPoint::from_str(
                "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb:1",
            )
            .unwrap(),
            value: Amount::from_sat(value),
            script_pubkey: fx.buyer.script_pubkey(),
        }
    }

    #[test]
    fn purchase_layout_matches_terms() {
        let fx = fixture(ChangePolicy::FoldIntoFee);
        let utxo = buyer_utxo(&fx, 20_000);
        let psbt =
            build_purchase(&fx.listing, &fx.terms, &[utxo], &fx.buyer, 2.0, &fx.params).unwrap();
        let outs = &psbt.unsigned_tx.output;

        assert_eq!(outs.len(), 4);
        assert_eq!(outs[0].script_pubkey, fx.terms.seller_address.script_pubkey());
        assert_eq!(outs[0].value.to_sat(), 10_000);
        assert_eq!(outs[1].script_pubkey, fx.buyer.script_pubkey());
        assert_eq!(outs[1].value.to_sat(), 546);
        assert_eq!(outs[2].script_pubkey, fx.params.fee_address.script_pubkey());
        assert_eq!(outs[2].value.to_sat(), 546);
        // 20546 in, 11092 out, 299 vB at 2 sat/vB
        assert_eq!(outs[3].value.to_sat(), 20_546 - 11_092 - 598);

        assert_eq!(psbt.unsigned_tx.input[0], fx.listing.unsigned_tx.input[0]);
        assert_eq!(psbt.inputs[0].tap_internal_key, fx.listing.inputs[0].tap_internal_key);
        assert!(psbt.inputs[0].tap_key_sig.is_none());
        assert_eq!(psbt.inputs[1].witness_utxo.as_ref().unwrap().value.to_sat(), 20_000);
    }

    #[test]
    fn fee_above_dust_uses_percentage() {
        assert_eq!(platform_fee(Amount::from_sat(10_000), 200, 546).to_sat(), 546);
        assert_eq!(platform_fee(Amount::from_sat(100_000), 200, 546).to_sat(), 2_000);
    }

    #[test]
    fn sub_dust_change_is_folded() {
        let fx = fixture(ChangePolicy::FoldIntoFee);
        // outputs 11092, fee with 3 outputs at 1 sat/vB = 58*2+43*3+11 = 256
        let utxo = buyer_utxo(&fx, 11_092 - 546 + 256 + 100);
        let psbt =
            build_purchase(&fx.listing, &fx.terms, &[utxo], &fx.buyer, 1.0, &fx.params).unwrap();
        assert_eq!(psbt.unsigned_tx.output.len(), 3);
    }

    #[test]
    fn sub_dust_change_is_pinned() {
        let fx = fixture(ChangePolicy::PinToDust);
        // at 3 sat/vB: 897 with change, remainder 300 is below dust
        let utxo = buyer_utxo(&fx, 11_092 + 897 + 300 - 546);
        let psbt =
            build_purchase(&fx.listing, &fx.terms, &[utxo], &fx.buyer, 3.0, &fx.params).unwrap();
        assert_eq!(psbt.unsigned_tx.output.len(), 4);
        assert_eq!(psbt.unsigned_tx.output[3].value.to_sat(), 546);
    }

    #[test]
    fn pinned_change_never_drops_below_min_relay_fee() {
        let fx = fixture(ChangePolicy::PinToDust);
        // 100 sats over the no-change fee of 256, pinning 546 leaves -190 for the miner
        let utxo = buyer_utxo(&fx, 11_092 - 546 + 256 + 100);
        let err = build_purchase(&fx.listing, &fx.terms, &[utxo], &fx.buyer, 1.0, &fx.params)
            .unwrap_err();
        match err {
            SwapError::InsufficientFunds { shortfall } => assert_eq!(shortfall, 299 + 190),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn no_buyer_coins_reports_full_shortfall() {
        let fx = fixture(ChangePolicy::PinToDust);
        let err =
            build_purchase(&fx.listing, &fx.terms, &[], &fx.buyer, 1.0, &fx.params).unwrap_err();
        match err {
            // 11092 out plus 198 vB for one input and three outputs, minus the asset
            SwapError::InsufficientFunds { shortfall } => assert_eq!(shortfall, 11_092 + 198 - 546),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn change_policy_defaults_to_pinning() {
        assert_eq!(ChangePolicy::default(), ChangePolicy::PinToDust);
        assert_eq!(ChangePolicy::from_str("fold_into_fee").unwrap(), ChangePolicy::FoldIntoFee);
        let err = ChangePolicy::from_str("burn").unwrap_err();
        assert!(err.to_string().contains("unknown change policy burn"));
    }

    #[test]
    fn shortfall_is_reported() {
        let fx = fixture(ChangePolicy::FoldIntoFee);
        let utxo = buyer_utxo(&fx, 5_000);
        let err = build_purchase(&fx.listing, &fx.terms, &[utxo], &fx.buyer, 1.0, &fx.params)
            .unwrap_err();
        match err {
            SwapError::InsufficientFunds { shortfall } => {
                assert_eq!(shortfall, 11_092 + 256 - 546 - 5_000)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
