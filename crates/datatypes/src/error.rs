use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::OfferStatus;

/// One failed submission against a broadcast provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastAttempt {
    pub provider: String,
    pub error: String,
}

impl fmt::Display for BroadcastAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Messages name what failed, never the signature, keys or psbt contents.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("crypto invariant violated: {0}")]
    CryptoInvariantViolation(String),

    #[error("insufficient funds, short by {shortfall} sats")]
    InsufficientFunds { shortfall: u64 },

    #[error("seller payment output was modified")]
    Output0Mismatch,

    #[error("purchase validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("offer is locked by {holder}, expires in {}s", .expires_in.as_secs())]
    LockDenied { holder: String, expires_in: Duration },

    #[error("input {input_index} is not signed")]
    IncompleteTransaction { input_index: usize },

    #[error("all broadcast providers failed: {}", join_attempts(.0))]
    BroadcastExhausted(Vec<BroadcastAttempt>),

    #[error("unsupported sighash byte 0x{0:02x}")]
    UnsupportedSighash(u8),

    #[error("signature sealing failed")]
    SignatureSealing,

    #[error("invalid psbt: {0}")]
    InvalidPsbt(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("offer not found: {0}")]
    OfferNotFound(String),

    #[error("offer is {status}")]
    OfferNotAvailable { status: OfferStatus },

    #[error("store error: {0}")]
    Store(String),

    #[error("transaction {txid} was broadcast but the offer update failed: {reason}")]
    StoreUpdateAfterBroadcast { txid: String, reason: String },
}

impl SwapError {
    /// Contention and provider outages are worth re-invoking; everything else
    /// means the request itself is malformed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapError::LockDenied { .. }
                | SwapError::BroadcastExhausted(_)
                | SwapError::StoreUpdateAfterBroadcast { .. }
        )
    }
}

fn join_attempts(attempts: &[BroadcastAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
