use super::*;
use crate::keys::{output_key_from_script, schnorr_verify, TaprootSigner};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::schnorr;
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::Signature;
use bitcoin::{TapSighash, TapSighashType};
use datatypes::types::SighashMode;

/// Key-path sighash of input `idx`. `ANYONECANPAY` modes only need that
/// input's prevout, the others need every prevout on the psbt.
pub fn key_spend_sighash(
    psbt: &Psbt,
    idx: usize,
    sighash_type: TapSighashType,
) -> Result<TapSighash, SwapError> {
    let prevout = crate::psbt::input_prevout(psbt, idx)
        .ok_or_else(|| SwapError::InvalidPsbt(format!("input {idx} has no previous output")))?;

    let mut sighash_cache = SighashCache::new(&psbt.unsigned_tx);
    let is_acp = SighashMode::from(sighash_type).anyone_can_pay();
    let sighash = if is_acp {
        sighash_cache.taproot_key_spend_signature_hash(
            idx,
            &Prevouts::One(idx, prevout),
            sighash_type,
        )
    } else {
        let prevouts = (0..psbt.inputs.len())
            .map(|i| {
                crate::psbt::input_prevout(psbt, i).ok_or_else(|| {
                    SwapError::InvalidPsbt(format!("input {i} has no previous output"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        sighash_cache.taproot_key_spend_signature_hash(idx, &Prevouts::All(&prevouts), sighash_type)
    };

    sighash.map_err(|e| SwapError::InvalidPsbt(format!("sighash for input {idx}: {e}")))
}

/// Seller signature over listing input 0.
///
/// Only `NONE|ANYONECANPAY` leaves outputs and other inputs free, every other
/// mode would be invalidated by the purchase.
pub fn sign_listing(
    listing: &Psbt,
    signer: &TaprootSigner,
    mode: SighashMode,
) -> Result<schnorr::Signature, SwapError> {
    if mode != SighashMode::NoneAnyoneCanPay {
        return Err(SwapError::UnsupportedSighash(mode.to_u8()));
    }

    let output_key = crate::psbt::input_prevout(listing, 0)
        .and_then(|out| output_key_from_script(&out.script_pubkey))
        .ok_or_else(|| SwapError::InvalidPsbt("listing input is not taproot".to_string()))?;
    if output_key != signer.output_key() {
        return Err(SwapError::KeyDerivation(
            "signer does not control the listed asset".to_string(),
        ));
    }

    let sighash = key_spend_sighash(listing, 0, mode.into())?;
    let signature = signer.sign(&sighash);
    if !schnorr_verify(&sighash.to_byte_array(), &output_key, &signature) {
        return Err(SwapError::CryptoInvariantViolation(
            "fresh listing signature does not verify".to_string(),
        ));
    }

    info!("listing input signed with sighash 0x{:02x}", mode.to_u8());
    Ok(signature)
}

/// Signs the given inputs in place and stores the signature in `tap_key_sig`.
pub fn sign_inputs(
    psbt: &mut Psbt,
    signer: &TaprootSigner,
    sign_idx: &[usize],
    sighash_type: TapSighashType,
) -> Result<(), SwapError> {
    for idx in sign_idx.iter() {
        let sighash = key_spend_sighash(psbt, *idx, sighash_type)?;
        let sig = signer.sign(&sighash);
        let input = psbt
            .inputs
            .get_mut(*idx)
            .ok_or_else(|| SwapError::InvalidPsbt(format!("no input {idx}")))?;
        input.tap_key_sig = Some(Signature {
            signature: sig,
            sighash_type,
        });
        debug!("signed input {}", idx);
    }

    Ok(())
}

/// Checks the key-path signature on input `idx` against its prevout's output key.
pub fn verify_key_spend(psbt: &Psbt, idx: usize) -> Result<(), SwapError> {
    let sig = psbt
        .inputs
        .get(idx)
        .and_then(|input| input.tap_key_sig.as_ref())
        .ok_or(SwapError::IncompleteTransaction { input_index: idx })?;
    if key_spend_verifies(psbt, idx, sig)? {
        Ok(())
    } else {
        Err(SwapError::CryptoInvariantViolation(format!(
            "signature on input {idx} does not verify"
        )))
    }
}

/// Checks a counterparty key-path spend on input `idx`, carried either as
/// `tap_key_sig` or as an already finalized single-element witness.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify.
pub fn verify_signed_input(psbt: &Psbt, idx: usize) -> Result<bool, SwapError> {
    let input = psbt
        .inputs
        .get(idx)
        .ok_or(SwapError::IncompleteTransaction { input_index: idx })?;
    if let Some(sig) = &input.tap_key_sig {
        return key_spend_verifies(psbt, idx, sig);
    }

    let item = input
        .final_script_witness
        .as_ref()
        .filter(|w| w.len() == 1)
        .and_then(|w| w.nth(0))
        .ok_or_else(|| {
            SwapError::InvalidPsbt(format!("input {idx} is not a taproot key-path spend"))
        })?;
    let sig = Signature::from_slice(item)
        .map_err(|e| SwapError::InvalidPsbt(format!("input {idx} witness signature: {e}")))?;
    key_spend_verifies(psbt, idx, &sig)
}

fn key_spend_verifies(psbt: &Psbt, idx: usize, sig: &Signature) -> Result<bool, SwapError> {
    let output_key = crate::psbt::input_prevout(psbt, idx)
        .and_then(|out| output_key_from_script(&out.script_pubkey))
        .ok_or_else(|| SwapError::InvalidPsbt(format!("input {idx} is not taproot")))?;
    let sighash = key_spend_sighash(psbt, idx, sig.sighash_type)?;
    Ok(schnorr_verify(&sighash.to_byte_array(), &output_key, &sig.signature))
}
