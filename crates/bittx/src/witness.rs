//! Manual finalization for key-path inputs.
//!
//! Generic finalizers assume default-mode signatures, so the witness is built
//! here straight from the stored signature and its sighash byte.

use bitcoin::consensus::encode::serialize;
use bitcoin::secp256k1::schnorr;
use datatypes::types::SighashMode;

use super::*;

/// `[signature || sighash_byte]` for explicit modes, `[signature]` for `DEFAULT`.
pub fn key_spend_witness(signature: &schnorr::Signature, mode: SighashMode) -> Witness {
    let mut item = Vec::with_capacity(SCHNORR_SIGNATURE_SIZE + 1);
    item.extend_from_slice(signature.as_ref());
    if !mode.is_default() {
        item.push(mode.to_u8());
    }

    let mut witness = Witness::new();
    witness.push(item);
    witness
}

/// Builds `final_script_witness` for every input that does not have one yet.
pub fn finalize_psbt(psbt: &mut Psbt) -> Result<(), SwapError> {
    for (idx, input) in psbt.inputs.iter_mut().enumerate() {
        let already_final = input
            .final_script_witness
            .as_ref()
            .map(|w| !w.is_empty())
            .unwrap_or(false);
        if already_final {
            continue;
        }

        let sig = input
            .tap_key_sig
            .as_ref()
            .ok_or(SwapError::IncompleteTransaction { input_index: idx })?;
        let witness = key_spend_witness(&sig.signature, sig.sighash_type.into());
        debug!("input {} finalized with {} byte witness", idx, witness.size());

        input.final_script_witness = Some(witness);
        input.tap_key_sig = None;
        input.tap_script_sigs.clear();
        input.partial_sigs.clear();
        input.sighash_type = None;
        input.tap_internal_key = None;
        input.tap_key_origins.clear();
        input.tap_merkle_root = None;
    }

    Ok(())
}

/// Index of the first input carrying neither witness nor script_sig.
pub fn check_unsigned_input(tx: &Transaction) -> Option<usize> {
    tx.input
        .iter()
        .position(|input| input.witness.is_empty() && input.script_sig.is_empty())
}

/// Finalizes and extracts the broadcastable transaction with its consensus bytes.
pub fn finalize(mut psbt: Psbt) -> Result<(Transaction, Vec<u8>), SwapError> {
    finalize_psbt(&mut psbt)?;
    let tx = psbt.extract_tx_unchecked_fee_rate();
    if let Some(idx) = check_unsigned_input(&tx) {
        return Err(SwapError::IncompleteTransaction { input_index: idx });
    }

    let raw = serialize(&tx);
    info!(
        "finalized tx {} ({} vbytes, {} bytes)",
        tx.compute_txid(),
        tx.vsize(),
        raw.len()
    );
    Ok((tx, raw))
}
