use super::*;
use bitcoin::psbt::Psbt;
use bitcoin::{Address, Amount};
use bittx::builder::listing::{build_listing, listing_template};
use bittx::builder::purchase::SaleTerms;
use bittx::keys::{AuxRandPolicy, InternalKey, TaprootSigner};
use bittx::{build_helper, signer};
use mempool::EsploraClient;
use types::{Offer, OfferStatus, SighashMode, Utxo};

/// Signs a listing for `asset` and seals the signature into a new active offer.
///
/// The plaintext signature never leaves this function.
pub fn list_offer(
    offer_id: &str,
    asset: &Utxo,
    seller_address: &Address,
    price: Amount,
    seller_key: &InternalKey,
    aux: AuxRandPolicy,
    sealer: &SignatureSealer,
) -> Result<Offer, SwapError> {
    let listing = build_listing(asset, seller_address, seller_key.x_only)?;
    let taproot_signer = TaprootSigner::new(seller_key, aux)?;
    let mode = SighashMode::NoneAnyoneCanPay;
    let signature = signer::sign_listing(&listing.psbt, &taproot_signer, mode)?;
    let encrypted_signature = sealer.encrypt_signature(offer_id, &asset.out_point, &signature)?;

    info!(
        "offer {} lists {} for {} sats",
        offer_id,
        asset.out_point,
        price.to_sat()
    );
    Ok(Offer {
        offer_id: offer_id.to_string(),
        inscription_utxo: asset.clone(),
        price,
        seller_address: seller_address.to_string(),
        encrypted_signature,
        sighash_mode: mode,
        status: OfferStatus::Active,
        transaction_id: None,
        completed_at: None,
    })
}

impl SwapDog {
    /// Sale terms and listing skeleton for a stored offer.
    pub fn listing_for(&self, offer: &Offer) -> Result<(Psbt, SaleTerms), SwapError> {
        let listing = listing_template(&offer.inscription_utxo)?;
        let terms = SaleTerms {
            seller_address: bittx::parse_address(&offer.seller_address, self.network)?,
            price: offer.price,
        };
        Ok((listing, terms))
    }

    /// Unsigned purchase psbt for the buyer to sign.
    pub async fn draft_purchase(
        &self,
        client: &EsploraClient,
        offer_id: &str,
        buyer_address: &Address,
        fee_rate: f64,
    ) -> Result<Psbt> {
        let offer = self.store.offer_by_id(offer_id).await?;
        if offer.status != OfferStatus::Active {
            return Err(SwapError::OfferNotAvailable {
                status: offer.status,
            }
            .into());
        }

        let (listing, terms) = self.listing_for(&offer)?;
        let psbt = build_helper::build_purchase_draft(
            client,
            &listing,
            &terms,
            buyer_address,
            fee_rate,
            &self.market,
        )
        .await?;
        info!(
            "drafted purchase of {} for {}, estimated {} vbytes signed",
            offer_id,
            buyer_address,
            bittx::vsize::signed_vsize(&psbt.unsigned_tx)
        );
        Ok(psbt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Network, OutPoint};
    use std::str::FromStr;

    #[test]
    fn listed_offer_holds_only_sealed_signature() {
        let seller = InternalKey::from_secret(SecretKey::from_slice(&[1u8; 32]).unwrap());
        let address = Address::p2tr(&Secp256k1::new(), seller.x_only, None, Network::Regtest);
        let asset = Utxo {
            out_point: OutPoint::from_str(
                "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:0",
            )
            .unwrap(),
            value: Amount::from_sat(546),
            script_pubkey: address.script_pubkey(),
        };
        let sealer = SignatureSealer::new([9u8; 32]);

        let offer = list_offer(
            "offer-1",
            &asset,
            &address,
            Amount::from_sat(10_000),
            &seller,
            AuxRandPolicy::Zero,
            &sealer,
        )
        .unwrap();
        assert_eq!(offer.status, OfferStatus::Active);
        assert_eq!(offer.sighash_mode, SighashMode::NoneAnyoneCanPay);

        let signature = sealer
            .decrypt_signature("offer-1", &asset.out_point, &offer.encrypted_signature)
            .unwrap();
        assert!(!offer
            .encrypted_signature
            .ciphertext
            .windows(64)
            .any(|w| w == signature.as_ref()));
    }
}
