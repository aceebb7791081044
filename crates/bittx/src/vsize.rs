use super::*;

pub const TAPROOT_INPUT_VBYTES: u64 = 58;
pub const TAPROOT_OUTPUT_VBYTES: u64 = 43;
pub const TX_OVERHEAD_VBYTES: u64 = 11;

/// Taproot key-path weight approximation.
pub fn estimate_vsize(inputs: usize, outputs: usize) -> u64 {
    inputs as u64 * TAPROOT_INPUT_VBYTES + outputs as u64 * TAPROOT_OUTPUT_VBYTES + TX_OVERHEAD_VBYTES
}

pub fn miner_fee(vsize: u64, fee_rate: f64) -> u64 {
    (vsize as f64 * fee_rate).ceil() as u64
}

/// vsize of `tx` once every input carries a 64-byte key-path signature.
pub fn signed_vsize(tx: &Transaction) -> usize {
    let mut tx = tx.clone();
    for input in tx.input.iter_mut() {
        input.witness = Witness::from_slice(&[&[0; SCHNORR_SIGNATURE_SIZE]]);
    }
    tx.vsize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::OutPoint;

    #[test]
    fn estimate_matches_formula() {
        assert_eq!(estimate_vsize(2, 4), 299);
        assert_eq!(miner_fee(299, 2.0), 598);
        assert_eq!(miner_fee(100, 1.5), 150);
        assert_eq!(miner_fee(101, 1.5), 152);
    }

    #[test]
    fn estimate_covers_real_taproot_size() {
        let spk = ScriptBuf::from_bytes([vec![0x51, 0x20], vec![1u8; 32]].concat());
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![
                TxIn {
                    previous_output: OutPoint::null(),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                };
                2
            ],
            output: vec![
                TxOut {
                    value: Amount::from_sat(1000),
                    script_pubkey: spk,
                };
                4
            ],
        };
        assert!(signed_vsize(&tx) as u64 <= estimate_vsize(2, 4));
    }
}
