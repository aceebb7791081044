use super::*;
use bitcoin::{Amount, OutPoint, ScriptBuf};
use std::str::FromStr;
use types::{SealedSignature, SighashMode, Utxo};

#[derive(Debug, PartialEq, FromRow)]
pub struct OfferRow {
    pub offer_id: String,
    pub tx_id: String,
    pub vout: i32,
    pub value: i64,
    pub script_pubkey: String,
    pub price: i64,
    pub seller_address: String,
    pub ciphertext: String,
    pub wrapped_key: String,
    pub sighash_mode: i16,
    pub status: String,
    pub transaction_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, FromRow)]
pub struct FraudRow {
    pub offer_id: String,
    pub buyer: String,
    pub reasons: String,
    pub psbt_digest: String,
    pub detected_at: DateTime<Utc>,
}

/// Lock columns of an offer, read when a claim is refused.
#[derive(Debug, PartialEq, FromRow)]
pub struct ClaimRow {
    pub status: String,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

fn bad_row(offer_id: &str, field: &str) -> SwapError {
    SwapError::Store(format!("offer {offer_id} has a malformed {field}"))
}

impl From<&Offer> for OfferRow {
    fn from(offer: &Offer) -> Self {
        let utxo = &offer.inscription_utxo;
        OfferRow {
            offer_id: offer.offer_id.clone(),
            tx_id: utxo.out_point.txid.to_string(),
            vout: utxo.out_point.vout as i32,
            value: utxo.value.to_sat() as i64,
            script_pubkey: utxo.script_pubkey.to_hex_string(),
            price: offer.price.to_sat() as i64,
            seller_address: offer.seller_address.clone(),
            ciphertext: hex::encode(&offer.encrypted_signature.ciphertext),
            wrapped_key: hex::encode(&offer.encrypted_signature.wrapped_key),
            sighash_mode: offer.sighash_mode.to_u8() as i16,
            status: offer.status.as_str().to_string(),
            transaction_id: offer.transaction_id.map(|t| t.to_string()),
            completed_at: offer.completed_at,
        }
    }
}

impl TryFrom<OfferRow> for Offer {
    type Error = SwapError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        let id = row.offer_id.as_str();
        let txid = Txid::from_str(&row.tx_id).map_err(|_| bad_row(id, "tx_id"))?;
        let vout = u32::try_from(row.vout).map_err(|_| bad_row(id, "vout"))?;
        let value = u64::try_from(row.value).map_err(|_| bad_row(id, "value"))?;
        let price = u64::try_from(row.price).map_err(|_| bad_row(id, "price"))?;
        let script_pubkey =
            ScriptBuf::from_hex(&row.script_pubkey).map_err(|_| bad_row(id, "script_pubkey"))?;
        let mode = u8::try_from(row.sighash_mode).map_err(|_| bad_row(id, "sighash_mode"))?;
        let transaction_id = row
            .transaction_id
            .as_deref()
            .map(Txid::from_str)
            .transpose()
            .map_err(|_| bad_row(id, "transaction_id"))?;

        Ok(Offer {
            inscription_utxo: Utxo {
                out_point: OutPoint { txid, vout },
                value: Amount::from_sat(value),
                script_pubkey,
            },
            price: Amount::from_sat(price),
            seller_address: row.seller_address.clone(),
            encrypted_signature: SealedSignature {
                ciphertext: hex::decode(&row.ciphertext).map_err(|_| bad_row(id, "ciphertext"))?,
                wrapped_key: hex::decode(&row.wrapped_key)
                    .map_err(|_| bad_row(id, "wrapped_key"))?,
            },
            sighash_mode: SighashMode::from_u8(mode)?,
            status: OfferStatus::from_str(&row.status)?,
            transaction_id,
            completed_at: row.completed_at,
            offer_id: row.offer_id,
        })
    }
}

impl From<&FraudAttempt> for FraudRow {
    fn from(attempt: &FraudAttempt) -> Self {
        FraudRow {
            offer_id: attempt.offer_id.clone(),
            buyer: attempt.buyer.clone(),
            reasons: attempt.reasons.join("\n"),
            psbt_digest: attempt.psbt_digest.clone(),
            detected_at: attempt.detected_at,
        }
    }
}
