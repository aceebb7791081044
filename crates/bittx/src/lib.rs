use bitcoin::absolute::LockTime;
use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};
use bitcoin::psbt::Psbt;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Network, Script, ScriptBuf, Sequence, Witness};
use datatypes::types;
use datatypes::SwapError;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub mod build_helper;
pub mod builder;
pub mod keys;
pub mod psbt;
pub mod signer;
pub mod vsize;
pub mod witness;

const SCHNORR_SIGNATURE_SIZE: usize = 64;

/// Relay dust threshold used when no other limit is configured.
pub const DUST_LIMIT_SATS: u64 = 546;

/// Parses an address and checks it belongs to `network`.
pub fn parse_address(addr: &str, network: Network) -> Result<Address, SwapError> {
    Address::from_str(addr)
        .map_err(|e| SwapError::InvalidAddress(format!("{addr}: {e}")))?
        .require_network(network)
        .map_err(|e| SwapError::InvalidAddress(format!("{addr}: {e}")))
}
