use super::*;
use bitcoin::psbt::Psbt;
use bittx::psbt::{check_output0_against, psbt_digest};
use bittx::{signer, witness};
use chrono::Utc;
use types::{FraudAttempt, Offer, OfferStatus};

impl SwapDog {
    /// Locks the offer, checks the buyer psbt, unseals the seller signature,
    /// finalizes and broadcasts. The lock is released on every exit path.
    #[tracing::instrument(skip_all, fields(offer_id = %offer_id, buyer = %buyer))]
    pub async fn execute_purchase(
        &self,
        offer_id: &str,
        buyer: &str,
        psbt: Psbt,
    ) -> Result<Txid, SwapError> {
        let offer = self.store.offer_by_id(offer_id).await?;
        if offer.status.is_terminal() {
            return Err(SwapError::OfferNotAvailable {
                status: offer.status,
            });
        }

        let (_guard, grant) = self.locks.acquire(offer_id, buyer, self.lock_ttl)?;
        debug!("purchase lock {:?}", grant);
        self.store.claim_offer(offer_id, buyer, self.lock_ttl).await?;

        match self.settle(&offer, buyer, psbt).await {
            Ok(txid) => {
                info!("offer {} settled in {}", offer_id, txid);
                Ok(txid)
            }
            Err(e) => {
                // after broadcast the offer stays locked until status recovery
                if !matches!(e, SwapError::StoreUpdateAfterBroadcast { .. }) {
                    if let Err(restore) = self.store.release_offer(offer_id, buyer).await {
                        error!("failed to reactivate offer {}: {}", offer_id, restore);
                    }
                }
                warn!("purchase of {} failed: {}", offer_id, e);
                Err(e)
            }
        }
    }

    async fn settle(&self, offer: &Offer, buyer: &str, psbt: Psbt) -> Result<Txid, SwapError> {
        let digest = psbt_digest(&psbt);

        let (_, terms) = self.listing_for(offer)?;
        if let Err(e) = check_output0_against(&terms.payment_output(), &psbt) {
            let reasons = vec!["output 0 differs from the listed payment".to_string()];
            self.report_fraud(offer, buyer, reasons, digest).await;
            return Err(e);
        }

        if let Err(e) = self.validator.validate(&psbt, offer) {
            if let SwapError::ValidationFailed(reasons) = &e {
                self.report_fraud(offer, buyer, reasons.clone(), digest).await;
            }
            return Err(e);
        }

        let combined = self.sealer.decrypt_and_inject(psbt, offer)?;
        signer::verify_key_spend(&combined, 0)?;
        let (tx, raw) = witness::finalize(combined)?;
        let txid = tx.compute_txid();

        if self.sender.is_known(&txid).await {
            info!("{} is already on the network, skipping submission", txid);
        } else {
            self.sender.broadcast(&raw).await?;
        }

        self.store
            .update_offer_status(
                &offer.offer_id,
                OfferStatus::Completed,
                Some(txid),
                Some(Utc::now()),
            )
            .await
            .map_err(|e| SwapError::StoreUpdateAfterBroadcast {
                txid: txid.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(bot) = &self.notifier {
            bot.notify_sold(&offer.offer_id, &txid.to_string(), offer.price.to_sat())
                .await;
        }
        Ok(txid)
    }

    async fn report_fraud(&self, offer: &Offer, buyer: &str, reasons: Vec<String>, digest: String) {
        warn!(
            "fraud attempt on offer {} by {}: {}",
            offer.offer_id,
            buyer,
            reasons.join("; ")
        );
        if let Some(bot) = &self.notifier {
            bot.notify_fraud(&offer.offer_id, buyer, &reasons).await;
        }

        let attempt = FraudAttempt {
            offer_id: offer.offer_id.clone(),
            buyer: buyer.to_string(),
            reasons,
            psbt_digest: digest,
            detected_at: Utc::now(),
        };
        if let Err(e) = self.store.record_fraud_attempt(attempt).await {
            error!("failed to record fraud attempt on {}: {}", offer.offer_id, e);
        }
    }
}
