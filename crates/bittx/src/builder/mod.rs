pub mod listing;
pub mod purchase;

use super::*;
use bitcoin::OutPoint;

/// Seller input sequence. Committed to by the seller signature, so purchase
/// drafts must copy it unchanged.
pub const LISTING_SEQUENCE: Sequence = Sequence::MAX;

pub fn unsigned_input(out_point: OutPoint) -> TxIn {
    TxIn {
        previous_output: out_point,
        script_sig: ScriptBuf::new(),
        sequence: LISTING_SEQUENCE,
        witness: Witness::new(),
    }
}

pub fn empty_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}
