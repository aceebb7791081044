use std::fmt;
use std::str::FromStr;

use bitcoin::{Amount, OutPoint, ScriptBuf, TapSighashType, TxOut, Txid};
use chrono::{DateTime, Utc};

use crate::SwapError;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub out_point: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
}

impl Utxo {
    pub fn tx_out(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Signature-hash modes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SighashMode {
    Default = 0x00,
    All = 0x01,
    None = 0x02,
    Single = 0x03,
    AllAnyoneCanPay = 0x81,
    NoneAnyoneCanPay = 0x82,
    SingleAnyoneCanPay = 0x83,
}

impl SighashMode {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Result<Self, SwapError> {
        let mode = match byte {
            0x00 => Self::Default,
            0x01 => Self::All,
            0x02 => Self::None,
            0x03 => Self::Single,
            0x81 => Self::AllAnyoneCanPay,
            0x82 => Self::NoneAnyoneCanPay,
            0x83 => Self::SingleAnyoneCanPay,
            other => return Err(SwapError::UnsupportedSighash(other)),
        };
        Ok(mode)
    }

    /// Taproot's implicit all-commit mode carries no trailing byte in the witness.
    pub fn is_default(self) -> bool {
        self == Self::Default
    }

    pub fn commits_to_outputs(self) -> bool {
        !matches!(self, Self::None | Self::NoneAnyoneCanPay)
    }

    pub fn anyone_can_pay(self) -> bool {
        self.to_u8() & 0x80 != 0
    }
}

impl From<SighashMode> for TapSighashType {
    fn from(mode: SighashMode) -> Self {
        match mode {
            SighashMode::Default => TapSighashType::Default,
            SighashMode::All => TapSighashType::All,
            SighashMode::None => TapSighashType::None,
            SighashMode::Single => TapSighashType::Single,
            SighashMode::AllAnyoneCanPay => TapSighashType::AllPlusAnyoneCanPay,
            SighashMode::NoneAnyoneCanPay => TapSighashType::NonePlusAnyoneCanPay,
            SighashMode::SingleAnyoneCanPay => TapSighashType::SinglePlusAnyoneCanPay,
        }
    }
}

impl From<TapSighashType> for SighashMode {
    fn from(ty: TapSighashType) -> Self {
        match ty {
            TapSighashType::Default => SighashMode::Default,
            TapSighashType::All => SighashMode::All,
            TapSighashType::None => SighashMode::None,
            TapSighashType::Single => SighashMode::Single,
            TapSighashType::AllPlusAnyoneCanPay => SighashMode::AllAnyoneCanPay,
            TapSighashType::NonePlusAnyoneCanPay => SighashMode::NoneAnyoneCanPay,
            TapSighashType::SinglePlusAnyoneCanPay => SighashMode::SingleAnyoneCanPay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfferStatus {
    Active,
    Locked,
    Completed,
    Cancelled,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Locked => "locked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// active -> locked -> completed | cancelled, locked may fall back to active.
    ///
    /// Locking is only ever granted from active, so a plain status write can
    /// not take over someone else's lock.
    pub fn can_transition_to(&self, next: OfferStatus) -> bool {
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (Self::Active, Self::Locked) => true,
            (Self::Locked, Self::Locked) => false,
            (Self::Locked, Self::Active) => true,
            (Self::Active | Self::Locked, Self::Completed | Self::Cancelled) => true,
            (a, b) => *a == b,
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "locked" => Ok(Self::Locked),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(SwapError::Store(format!("unknown offer status {other}"))),
        }
    }
}

/// Seller signature sealed under a per-offer content key.
///
/// `ciphertext` is `nonce || aes-gcm(signature)`, `wrapped_key` is the content
/// key sealed under the platform master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSignature {
    pub ciphertext: Vec<u8>,
    pub wrapped_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Offer {
    pub offer_id: String,
    pub inscription_utxo: Utxo,
    pub price: Amount,
    pub seller_address: String,
    pub encrypted_signature: SealedSignature,
    pub sighash_mode: SighashMode,
    pub status: OfferStatus,
    pub transaction_id: Option<Txid>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FraudAttempt {
    pub offer_id: String,
    pub buyer: String,
    pub reasons: Vec<String>,
    /// sha256 of the submitted psbt, the psbt itself is not kept.
    pub psbt_digest: String,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sighash_bytes_match_wire_values() {
        for byte in [0x00u8, 0x01, 0x02, 0x03, 0x81, 0x82, 0x83] {
            let mode = SighashMode::from_u8(byte).unwrap();
            assert_eq!(mode.to_u8(), byte);
            let tap: TapSighashType = mode.into();
            assert_eq!(tap as u8, byte);
            assert_eq!(SighashMode::from(tap), mode);
        }
        assert!(SighashMode::from_u8(0x04).is_err());
        assert!(SighashMode::NoneAnyoneCanPay.anyone_can_pay());
        assert!(!SighashMode::NoneAnyoneCanPay.commits_to_outputs());
    }

    #[test]
    fn terminal_status_is_final() {
        assert!(OfferStatus::Active.can_transition_to(OfferStatus::Locked));
        assert!(OfferStatus::Locked.can_transition_to(OfferStatus::Completed));
        assert!(OfferStatus::Locked.can_transition_to(OfferStatus::Active));
        assert!(!OfferStatus::Locked.can_transition_to(OfferStatus::Locked));
        assert!(!OfferStatus::Completed.can_transition_to(OfferStatus::Active));
        assert!(!OfferStatus::Cancelled.can_transition_to(OfferStatus::Completed));
        assert_eq!("locked".parse::<OfferStatus>().unwrap(), OfferStatus::Locked);
    }
}
