//! Envelope encryption for seller signatures.
//!
//! Every offer gets a fresh AES-256-GCM content key. The signature is sealed
//! under that key and the key is sealed under the service master key. Both
//! seals bind the offer id and asset outpoint as associated data, so a sealed
//! signature cannot be moved to another offer. Blobs are `nonce || ciphertext`.

use super::*;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use bitcoin::psbt::{Psbt, PsbtSighashType};
use bitcoin::secp256k1::schnorr;
use bitcoin::taproot::Signature;
use bitcoin::{OutPoint, TapSighashType};
use rand::RngCore;
use types::{Offer, SealedSignature};

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

pub struct SignatureSealer {
    master_key: [u8; KEY_LENGTH],
}

impl SignatureSealer {
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    pub fn encrypt_signature(
        &self,
        offer_id: &str,
        asset: &OutPoint,
        signature: &schnorr::Signature,
    ) -> Result<SealedSignature, SwapError> {
        let aad = associated_data(offer_id, asset);
        let mut content_key = [0u8; KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut content_key);

        let ciphertext = seal(&content_key, signature.as_ref(), &aad);
        let wrapped_key = seal(&self.master_key, &content_key, &aad);
        content_key.fill(0);

        Ok(SealedSignature {
            ciphertext: ciphertext?,
            wrapped_key: wrapped_key?,
        })
    }

    pub fn decrypt_signature(
        &self,
        offer_id: &str,
        asset: &OutPoint,
        sealed: &SealedSignature,
    ) -> Result<schnorr::Signature, SwapError> {
        let aad = associated_data(offer_id, asset);
        let mut content_key: [u8; KEY_LENGTH] = open(&self.master_key, &sealed.wrapped_key, &aad)?
            .try_into()
            .map_err(|_| SwapError::SignatureSealing)?;
        let plain = open(&content_key, &sealed.ciphertext, &aad);
        content_key.fill(0);

        schnorr::Signature::from_slice(&plain?).map_err(|_| SwapError::SignatureSealing)
    }

    /// Unseals the offer's signature and attaches it to input 0.
    ///
    /// Callers must have validated this exact psbt first.
    pub fn decrypt_and_inject(&self, mut psbt: Psbt, offer: &Offer) -> Result<Psbt, SwapError> {
        let asset = offer.inscription_utxo.out_point;
        match psbt.unsigned_tx.input.first() {
            Some(input) if input.previous_output == asset => {}
            _ => {
                return Err(SwapError::InvalidPsbt(
                    "input 0 does not spend the listed asset".to_string(),
                ))
            }
        }

        let signature = self.decrypt_signature(&offer.offer_id, &asset, &offer.encrypted_signature)?;
        let sighash_type: TapSighashType = offer.sighash_mode.into();
        let input = &mut psbt.inputs[0];
        input.tap_key_sig = Some(Signature {
            signature,
            sighash_type,
        });
        input.sighash_type = Some(PsbtSighashType::from(sighash_type));
        input.final_script_witness = None;

        debug!("seller signature injected for offer {}", offer.offer_id);
        Ok(psbt)
    }
}

fn associated_data(offer_id: &str, asset: &OutPoint) -> Vec<u8> {
    format!("{}|{}", offer_id, asset).into_bytes()
}

fn seal(key: &[u8; KEY_LENGTH], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SwapError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SwapError::SignatureSealing)?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| SwapError::SignatureSealing)?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &[u8; KEY_LENGTH], data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SwapError> {
    if data.len() < NONCE_LENGTH {
        return Err(SwapError::SignatureSealing);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SwapError::SignatureSealing)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad })
        .map_err(|_| SwapError::SignatureSealing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sig() -> schnorr::Signature {
        let mut bytes = [0u8; 64];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        schnorr::Signature::from_slice(&bytes).unwrap()
    }

    fn outpoint() -> OutPoint {
        OutPoint::from_str("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:0").unwrap()
    }

    #[test]
    fn right_key_recovers_exact_signature() {
        let sealer = SignatureSealer::new([7u8; 32]);
        let sealed = sealer.encrypt_signature("offer-1", &outpoint(), &sig()).unwrap();

        assert!(!sealed.ciphertext.windows(64).any(|w| w == sig().as_ref()));
        let opened = sealer.decrypt_signature("offer-1", &outpoint(), &sealed).unwrap();
        assert_eq!(opened.as_ref(), sig().as_ref());
    }

    #[test]
    fn wrong_master_key_fails() {
        let sealed = SignatureSealer::new([7u8; 32])
            .encrypt_signature("offer-1", &outpoint(), &sig())
            .unwrap();
        let other = SignatureSealer::new([8u8; 32]);
        assert!(matches!(
            other.decrypt_signature("offer-1", &outpoint(), &sealed),
            Err(SwapError::SignatureSealing)
        ));
    }

    #[test]
    fn another_offers_content_key_fails() {
        let sealer = SignatureSealer::new([7u8; 32]);
        let a = sealer.encrypt_signature("offer-1", &outpoint(), &sig()).unwrap();
        let b = sealer.encrypt_signature("offer-1", &outpoint(), &sig()).unwrap();
        assert_ne!(a.wrapped_key, b.wrapped_key);

        let mixed = SealedSignature {
            ciphertext: a.ciphertext.clone(),
            wrapped_key: b.wrapped_key.clone(),
        };
        assert!(sealer.decrypt_signature("offer-1", &outpoint(), &mixed).is_err());
    }

    #[test]
    fn sealed_signature_is_bound_to_its_offer() {
        let sealer = SignatureSealer::new([7u8; 32]);
        let sealed = sealer.encrypt_signature("offer-1", &outpoint(), &sig()).unwrap();
        assert!(sealer.decrypt_signature("offer-2", &outpoint(), &sealed).is_err());

        let mut tampered = sealed.clone();
        let last = tampered.ciphertext.len() - 1;
        tampered.ciphertext[last] ^= 1;
        assert!(sealer.decrypt_signature("offer-1", &outpoint(), &tampered).is_err());
    }
}
