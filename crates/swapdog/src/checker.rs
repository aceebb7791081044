//! Buyer psbt checks that gate signature release.
//!
//! Every check runs even after an earlier one fails so the fraud record lists
//! all problems at once.

use super::*;
use bitcoin::psbt::Psbt;
use bitcoin::{Address, Network, ScriptBuf};
use bittx::builder::purchase::{platform_fee, MarketParams};
use bittx::builder::{empty_tx, LISTING_SEQUENCE};
use bittx::psbt::{input_has_signature, input_prevout};
use bittx::signer::verify_signed_input;
use types::Offer;

/// What a successful validation learned about the purchase.
#[derive(Debug, Clone)]
pub struct ValidatedPurchase {
    pub buyer_script: ScriptBuf,
}

pub struct SecurityValidator {
    network: Network,
    market: MarketParams,
}

impl SecurityValidator {
    pub fn new(network: Network, market: MarketParams) -> Self {
        Self { network, market }
    }

    pub fn validate(&self, psbt: &Psbt, offer: &Offer) -> Result<ValidatedPurchase, SwapError> {
        let mut reasons = Vec::new();
        let tx = &psbt.unsigned_tx;
        let outputs = &tx.output;

        // the seller signature commits to version and lock time
        let listed = empty_tx(vec![], vec![]);
        if tx.version != listed.version {
            reasons.push(format!(
                "version {} differs from the listing version {}",
                tx.version.0, listed.version.0
            ));
        }
        if tx.lock_time != listed.lock_time {
            reasons.push(format!(
                "lock time {} differs from the listing lock time {}",
                tx.lock_time, listed.lock_time
            ));
        }

        if outputs.len() < 2 {
            reasons.push(format!("expected at least 2 outputs, found {}", outputs.len()));
        }

        match bittx::parse_address(&offer.seller_address, self.network) {
            Ok(seller) => match outputs.first() {
                Some(out) => {
                    if out.script_pubkey != seller.script_pubkey() {
                        reasons.push("output 0 does not pay the seller address".to_string());
                    }
                    if out.value != offer.price {
                        reasons.push(format!(
                            "output 0 pays {} sats, price is {} sats",
                            out.value.to_sat(),
                            offer.price.to_sat()
                        ));
                    }
                }
                None => reasons.push("output 0 is missing".to_string()),
            },
            Err(e) => reasons.push(format!("offer seller address unusable: {e}")),
        }

        match (tx.input.first(), psbt.inputs.first()) {
            (Some(txin), Some(input)) => {
                if txin.previous_output != offer.inscription_utxo.out_point {
                    reasons.push("input 0 does not spend the listed asset".to_string());
                }
                if txin.sequence != LISTING_SEQUENCE {
                    reasons.push("input 0 sequence differs from the listing".to_string());
                }
                if input.witness_utxo.as_ref() != Some(&offer.inscription_utxo.tx_out()) {
                    reasons.push("input 0 previous output differs from the listed asset".to_string());
                }
            }
            _ => reasons.push("input 0 is missing".to_string()),
        }

        // buyer identity comes from the scripts of the buyer's own signed inputs
        let mut buyer_scripts: Vec<ScriptBuf> = Vec::new();
        if tx.input.len() < 2 {
            reasons.push("no buyer inputs".to_string());
        }
        for idx in 1..tx.input.len() {
            let signed = psbt.inputs.get(idx).map(input_has_signature).unwrap_or(false);
            if !signed {
                reasons.push(format!("buyer input {idx} is not signed"));
                continue;
            }
            match verify_signed_input(psbt, idx) {
                Ok(true) => {}
                Ok(false) => reasons.push(format!("buyer input {idx} signature does not verify")),
                Err(e) => reasons.push(format!("buyer input {idx} signature cannot be checked: {e}")),
            }
            match input_prevout(psbt, idx) {
                Some(prevout) => {
                    if !buyer_scripts.contains(&prevout.script_pubkey) {
                        buyer_scripts.push(prevout.script_pubkey);
                    }
                }
                None => reasons.push(format!("buyer input {idx} has no previous output")),
            }
        }

        let asset_out = outputs.get(1);
        match asset_out {
            Some(out) if buyer_scripts.contains(&out.script_pubkey) => {}
            Some(_) if buyer_scripts.is_empty() => {
                reasons.push("buyer address cannot be detected from signed inputs".to_string())
            }
            Some(out) => reasons.push(format!(
                "output 1 sends the asset to {} instead of the buyer",
                describe(&out.script_pubkey, self.network)
            )),
            None => reasons.push("output 1 is missing".to_string()),
        }

        let fee = platform_fee(offer.price, self.market.fee_bps, self.market.dust_limit);
        let fee_script = self.market.fee_address.script_pubkey();
        match outputs.get(2) {
            Some(out) if out.script_pubkey == fee_script && out.value >= fee => {}
            Some(out) if out.script_pubkey == fee_script => reasons.push(format!(
                "platform fee is {} sats, expected {} sats",
                out.value.to_sat(),
                fee.to_sat()
            )),
            _ => reasons.push("output 2 does not pay the platform fee address".to_string()),
        }

        if !reasons.is_empty() {
            return Err(SwapError::ValidationFailed(reasons));
        }

        let buyer_script = asset_out
            .map(|out| out.script_pubkey.clone())
            .unwrap_or_default();
        debug!(
            "purchase of {} validated for buyer {}",
            offer.offer_id,
            describe(&buyer_script, self.network)
        );
        Ok(ValidatedPurchase { buyer_script })
    }
}

fn describe(script: &ScriptBuf, network: Network) -> String {
    Address::from_script(script, network)
        .map(|a| a.to_string())
        .unwrap_or_else(|_| script.to_hex_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::secp256k1::{schnorr, Secp256k1, SecretKey};
    use bitcoin::taproot::Signature;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, TapSighashType};
    use bittx::builder::listing::listing_template;
    use bittx::builder::purchase::{build_purchase, ChangePolicy, SaleTerms};
    use bittx::keys::{AuxRandPolicy, InternalKey, TaprootSigner};
    use bittx::signer::sign_inputs;
    use std::str::FromStr;
    use types::{OfferStatus, SealedSignature, SighashMode, Utxo};

    fn key(seed: u8) -> InternalKey {
        InternalKey::from_secret(SecretKey::from_slice(&[seed; 32]).unwrap())
    }

    fn address(seed: u8) -> Address {
        Address::p2tr(&Secp256k1::new(), key(seed).x_only, None, Network::Regtest)
    }

    fn market() -> MarketParams {
        MarketParams {
            fee_address: address(3),
            fee_bps: 200,
            dust_limit: 546,
            change_policy: ChangePolicy::PinToDust,
        }
    }

    fn offer() -> Offer {
        Offer {
            offer_id: "offer-1".to_string(),
            inscription_utxo: Utxo {
                out_point: OutPoint::from_str(
                    "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:0",
                )
                .unwrap(),
                value: Amount::from_sat(546),
                script_pubkey: address(1).script_pubkey(),
            },
            price: Amount::from_sat(10_000),
            seller_address: address(1).to_string(),
            encrypted_signature: SealedSignature {
                ciphertext: vec![],
                wrapped_key: vec![],
            },
            sighash_mode: SighashMode::NoneAnyoneCanPay,
            status: OfferStatus::Active,
            transaction_id: None,
            completed_at: None,
        }
    }

    fn draft(offer: &Offer) -> Psbt {
        let listing = listing_template(&offer.inscription_utxo).unwrap();
        let buyer = address(2);
        let terms = SaleTerms {
            seller_address: address(1),
            price: offer.price,
        };
        let coin = Utxo {
            out_point: OutPoint::from_str(
                "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb:1",
            )
            .unwrap(),
            value: Amount::from_sat(20_000),
            script_pubkey: buyer.script_pubkey(),
        };
        build_purchase(&listing, &terms, &[coin], &buyer, 2.0, &market()).unwrap()
    }

    fn sign_buyer(psbt: &mut Psbt) {
        let signer = TaprootSigner::new(&key(2), AuxRandPolicy::Zero).unwrap();
        sign_inputs(psbt, &signer, &[1], TapSighashType::Default).unwrap();
    }

    fn signed_purchase(offer: &Offer) -> Psbt {
        let mut psbt = draft(offer);
        sign_buyer(&mut psbt);
        psbt
    }

    fn validator() -> SecurityValidator {
        SecurityValidator::new(Network::Regtest, market())
    }

    #[test]
    fn honest_purchase_passes() {
        let offer = offer();
        let validated = validator().validate(&signed_purchase(&offer), &offer).unwrap();
        assert_eq!(validated.buyer_script, address(2).script_pubkey());
    }

    #[test]
    fn every_failure_is_reported() {
        let offer = offer();
        let mut psbt = draft(&offer);
        psbt.unsigned_tx.output[0].value = Amount::from_sat(9_000);
        psbt.unsigned_tx.output[1].script_pubkey = address(9).script_pubkey();

        match validator().validate(&psbt, &offer) {
            Err(SwapError::ValidationFailed(reasons)) => {
                assert_eq!(reasons.len(), 3, "{reasons:?}");
                assert!(reasons[0].contains("price"));
                assert!(reasons[1].contains("not signed"));
                assert!(reasons[2].contains("cannot be detected"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn asset_redirect_is_rejected() {
        let offer = offer();
        let mut psbt = draft(&offer);
        psbt.unsigned_tx.output[1].script_pubkey = address(9).script_pubkey();
        sign_buyer(&mut psbt);
        match validator().validate(&psbt, &offer) {
            Err(SwapError::ValidationFailed(reasons)) => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].contains(&address(9).to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn single_output_fails_count_check() {
        let offer = offer();
        let mut psbt = draft(&offer);
        psbt.unsigned_tx.output.truncate(1);
        psbt.outputs.truncate(1);
        sign_buyer(&mut psbt);
        match validator().validate(&psbt, &offer) {
            Err(SwapError::ValidationFailed(reasons)) => {
                assert!(reasons.iter().any(|r| r.contains("at least 2 outputs")));
                assert!(reasons.iter().any(|r| r.contains("output 1 is missing")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn junk_buyer_signature_is_rejected() {
        let offer = offer();
        let mut psbt = draft(&offer);
        psbt.inputs[1].tap_key_sig = Some(Signature {
            signature: schnorr::Signature::from_slice(&[0x11u8; 64]).unwrap(),
            sighash_type: TapSighashType::Default,
        });
        match validator().validate(&psbt, &offer) {
            Err(SwapError::ValidationFailed(reasons)) => {
                assert_eq!(reasons, vec!["buyer input 1 signature does not verify".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lock_time_and_version_must_match_listing() {
        let offer = offer();
        let mut psbt = draft(&offer);
        psbt.unsigned_tx.lock_time = LockTime::from_consensus(1);
        psbt.unsigned_tx.version = Version::ONE;
        sign_buyer(&mut psbt);
        match validator().validate(&psbt, &offer) {
            Err(SwapError::ValidationFailed(reasons)) => {
                assert_eq!(reasons.len(), 2, "{reasons:?}");
                assert!(reasons[0].starts_with("version 1"));
                assert!(reasons[1].starts_with("lock time 1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
