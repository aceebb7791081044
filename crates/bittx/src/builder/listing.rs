use bitcoin::psbt::PsbtSighashType;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::TapSighashType;
use secp256k1::Secp256k1;

use super::*;

/// A seller's listing: the asset input alone, with no outputs.
#[derive(Debug, Clone)]
pub struct Listing {
    pub psbt: Psbt,
    pub asset: types::Utxo,
    pub seller_address: Address,
}

/// One input spending the asset and zero outputs, so a `NONE|ANYONECANPAY`
/// signature over it commits to nothing about where funds go.
pub fn build_listing(
    asset: &types::Utxo,
    seller_address: &Address,
    internal_key: XOnlyPublicKey,
) -> Result<Listing, SwapError> {
    if !asset.script_pubkey.is_p2tr() {
        return Err(SwapError::InvalidPsbt(
            "asset output is not a taproot output".to_string(),
        ));
    }

    let secp = Secp256k1::verification_only();
    if ScriptBuf::new_p2tr(&secp, internal_key, None) != asset.script_pubkey {
        return Err(SwapError::KeyDerivation(
            "internal key does not control the asset output".to_string(),
        ));
    }

    let mut psbt = listing_template(asset)?;
    psbt.inputs[0].tap_internal_key = Some(internal_key);

    info!(
        "built listing for {} at {} sats",
        asset.out_point,
        asset.value.to_sat()
    );

    Ok(Listing {
        psbt,
        asset: asset.clone(),
        seller_address: seller_address.clone(),
    })
}

/// Listing skeleton rebuilt from a stored asset reference. Carries no internal
/// key, which purchase assembly and sighash computation do not need.
pub fn listing_template(asset: &types::Utxo) -> Result<Psbt, SwapError> {
    let tx = empty_tx(vec![unsigned_input(asset.out_point)], vec![]);
    let mut psbt =
        Psbt::from_unsigned_tx(tx).map_err(|e| SwapError::InvalidPsbt(e.to_string()))?;
    let input = &mut psbt.inputs[0];
    input.witness_utxo = Some(asset.tx_out());
    input.sighash_type = Some(PsbtSighashType::from(TapSighashType::NonePlusAnyoneCanPay));
    Ok(psbt)
}
