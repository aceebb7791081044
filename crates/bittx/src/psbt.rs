//! Base64 PSBT codec and the output[0] immutability check.

use base64::{engine::general_purpose::STANDARD, Engine};
use bitcoin::psbt::Input;
use sha2::{Digest, Sha256};

use super::*;

pub fn encode_psbt(psbt: &Psbt) -> String {
    STANDARD.encode(psbt.serialize())
}

pub fn decode_psbt(encoded: &str) -> Result<Psbt, SwapError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SwapError::InvalidPsbt(format!("base64: {e}")))?;
    Psbt::deserialize(&bytes).map_err(|e| SwapError::InvalidPsbt(e.to_string()))
}

/// Hex sha256 of the serialized psbt, for audit records.
pub fn psbt_digest(psbt: &Psbt) -> String {
    hex::encode(Sha256::digest(psbt.serialize()))
}

/// Compares output[0] script and value of two partial transactions.
pub fn check_output0(reference: &Psbt, candidate: &Psbt) -> Result<(), SwapError> {
    match reference.unsigned_tx.output.first() {
        Some(expected) => check_output0_against(expected, candidate),
        None => Err(SwapError::Output0Mismatch),
    }
}

/// Compares output[0] of `candidate` with the seller payment output the offer demands.
pub fn check_output0_against(expected: &TxOut, candidate: &Psbt) -> Result<(), SwapError> {
    match candidate.unsigned_tx.output.first() {
        Some(out) if out.script_pubkey == expected.script_pubkey && out.value == expected.value => {
            Ok(())
        }
        _ => Err(SwapError::Output0Mismatch),
    }
}

/// True when the input carries a key-path, partial or finalized signature.
pub fn input_has_signature(input: &Input) -> bool {
    input.tap_key_sig.is_some()
        || !input.tap_script_sigs.is_empty()
        || !input.partial_sigs.is_empty()
        || input
            .final_script_witness
            .as_ref()
            .map(|w| !w.is_empty())
            .unwrap_or(false)
        || input
            .final_script_sig
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
}

/// Script of the coin spent by input `index`, from `witness_utxo` or `non_witness_utxo`.
pub fn input_prevout(psbt: &Psbt, index: usize) -> Option<TxOut> {
    let input = psbt.inputs.get(index)?;
    if let Some(out) = &input.witness_utxo {
        return Some(out.clone());
    }
    let vout = psbt.unsigned_tx.input.get(index)?.previous_output.vout as usize;
    input
        .non_witness_utxo
        .as_ref()
        .and_then(|tx| tx.output.get(vout).cloned())
}
