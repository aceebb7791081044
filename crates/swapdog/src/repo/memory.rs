use super::*;
use std::collections::HashMap;
use std::sync::Mutex;

struct Claim {
    holder: String,
    until: DateTime<Utc>,
}

struct Entry {
    offer: Offer,
    claim: Option<Claim>,
}

/// In-process store for dry runs and tests.
#[derive(Default)]
pub struct MemoryOfferStore {
    offers: Mutex<HashMap<String, Entry>>,
    fraud: Mutex<Vec<FraudAttempt>>,
}

impl MemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, offer: Offer) {
        let mut offers = self.offers.lock().unwrap_or_else(|e| e.into_inner());
        offers.insert(offer.offer_id.clone(), Entry { offer, claim: None });
    }

    pub fn fraud_attempts(&self) -> Vec<FraudAttempt> {
        self.fraud.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl OfferStore for MemoryOfferStore {
    async fn offer_by_id(&self, offer_id: &str) -> Result<Offer, SwapError> {
        let offers = self.offers.lock().unwrap_or_else(|e| e.into_inner());
        offers
            .get(offer_id)
            .map(|entry| entry.offer.clone())
            .ok_or_else(|| SwapError::OfferNotFound(offer_id.to_string()))
    }

    async fn update_offer_status(
        &self,
        offer_id: &str,
        status: OfferStatus,
        transaction_id: Option<Txid>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SwapError> {
        let mut offers = self.offers.lock().unwrap_or_else(|e| e.into_inner());
        let entry = offers
            .get_mut(offer_id)
            .ok_or_else(|| SwapError::OfferNotFound(offer_id.to_string()))?;
        let offer = &mut entry.offer;
        if !offer.status.can_transition_to(status) {
            return Err(SwapError::OfferNotAvailable {
                status: offer.status,
            });
        }

        if status != OfferStatus::Locked {
            entry.claim = None;
        }
        offer.status = status;
        if transaction_id.is_some() {
            offer.transaction_id = transaction_id;
        }
        if completed_at.is_some() {
            offer.completed_at = completed_at;
        }
        Ok(())
    }

    async fn claim_offer(&self, offer_id: &str, holder: &str, ttl: Duration) -> Result<(), SwapError> {
        let now = Utc::now();
        let mut offers = self.offers.lock().unwrap_or_else(|e| e.into_inner());
        let entry = offers
            .get_mut(offer_id)
            .ok_or_else(|| SwapError::OfferNotFound(offer_id.to_string()))?;

        match (entry.offer.status, &entry.claim) {
            (OfferStatus::Active, _) => {}
            (OfferStatus::Locked, Some(claim)) if claim.holder != holder && claim.until > now => {
                return Err(claim_denied(Some(claim.holder.clone()), Some(claim.until), now));
            }
            (OfferStatus::Locked, _) => {}
            (status, _) => return Err(SwapError::OfferNotAvailable { status }),
        }

        entry.offer.status = OfferStatus::Locked;
        entry.claim = Some(Claim {
            holder: holder.to_string(),
            until: claim_deadline(now, ttl)?,
        });
        Ok(())
    }

    async fn release_offer(&self, offer_id: &str, holder: &str) -> Result<(), SwapError> {
        let mut offers = self.offers.lock().unwrap_or_else(|e| e.into_inner());
        let entry = offers
            .get_mut(offer_id)
            .ok_or_else(|| SwapError::OfferNotFound(offer_id.to_string()))?;
        let owned = entry.offer.status == OfferStatus::Locked
            && entry.claim.as_ref().map(|c| c.holder == holder).unwrap_or(false);
        if owned {
            entry.offer.status = OfferStatus::Active;
            entry.claim = None;
        }
        Ok(())
    }

    async fn record_fraud_attempt(&self, attempt: FraudAttempt) -> Result<(), SwapError> {
        self.fraud
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(attempt);
        Ok(())
    }
}
