use offer::{ClaimRow, FraudRow, OfferRow};

use super::*;

impl Dao {
    pub async fn insert_offer(&self, offer: &Offer) -> Result<(), sqlx::Error> {
        let row = OfferRow::from(offer);
        sqlx::query("INSERT INTO offers (offer_id, tx_id, vout, value, script_pubkey, price, seller_address, ciphertext, wrapped_key, sighash_mode, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
            .bind(&row.offer_id)
            .bind(&row.tx_id)
            .bind(row.vout)
            .bind(row.value)
            .bind(&row.script_pubkey)
            .bind(row.price)
            .bind(&row.seller_address)
            .bind(&row.ciphertext)
            .bind(&row.wrapped_key)
            .bind(row.sighash_mode)
            .bind(&row.status)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_offer(&self, offer_id: &str) -> Result<Option<OfferRow>, sqlx::Error> {
        let row: Option<OfferRow> = sqlx::query_as(
            "SELECT offer_id, tx_id, vout, value, script_pubkey, price, seller_address, ciphertext, wrapped_key, sighash_mode, status, transaction_id, completed_at FROM offers WHERE offer_id = $1",
        )
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Returns affected rows, 0 when the offer is missing or already terminal.
    pub async fn update_status(
        &self,
        offer_id: &str,
        status: OfferStatus,
        transaction_id: Option<String>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = sqlx::query(
            "UPDATE offers SET status = $2, transaction_id = COALESCE($3, transaction_id), completed_at = COALESCE($4, completed_at), locked_by = CASE WHEN $2 = 'locked' THEN locked_by END, locked_until = CASE WHEN $2 = 'locked' THEN locked_until END WHERE offer_id = $1 AND status NOT IN ('completed', 'cancelled') AND ($2 <> 'locked' OR status = 'active')",
        )
        .bind(offer_id)
        .bind(status.as_str())
        .bind(transaction_id)
        .bind(completed_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }

    /// Compare-and-set lock, 0 rows when another holder's claim is live.
    pub async fn claim(
        &self,
        offer_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = sqlx::query(
            "UPDATE offers SET status = 'locked', locked_by = $2, locked_until = $4 WHERE offer_id = $1 AND (status = 'active' OR (status = 'locked' AND (locked_by IS NULL OR locked_by = $2 OR locked_until <= $3)))",
        )
        .bind(offer_id)
        .bind(holder)
        .bind(now)
        .bind(until)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }

    pub async fn release(&self, offer_id: &str, holder: &str) -> Result<u64, sqlx::Error> {
        let rows_affected = sqlx::query(
            "UPDATE offers SET status = 'active', locked_by = NULL, locked_until = NULL WHERE offer_id = $1 AND status = 'locked' AND locked_by = $2",
        )
        .bind(offer_id)
        .bind(holder)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }

    pub async fn get_claim(&self, offer_id: &str) -> Result<Option<ClaimRow>, sqlx::Error> {
        let row: Option<ClaimRow> = sqlx::query_as(
            "SELECT status, locked_by, locked_until FROM offers WHERE offer_id = $1",
        )
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn insert_fraud_attempt(&self, row: &FraudRow) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO fraud_attempts (offer_id, buyer, reasons, psbt_digest, detected_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(&row.offer_id)
            .bind(&row.buyer)
            .bind(&row.reasons)
            .bind(&row.psbt_digest)
            .bind(row.detected_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_fraud_attempts(&self, offer_id: &str) -> Result<Vec<FraudRow>, sqlx::Error> {
        let rows: Vec<FraudRow> = sqlx::query_as(
            "SELECT offer_id, buyer, reasons, psbt_digest, detected_at FROM fraud_attempts WHERE offer_id = $1 ORDER BY detected_at DESC",
        )
        .bind(offer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl OfferStore for Dao {
    async fn offer_by_id(&self, offer_id: &str) -> Result<Offer, SwapError> {
        match self.get_offer(offer_id).await.map_err(store_err)? {
            Some(row) => Offer::try_from(row),
            None => Err(SwapError::OfferNotFound(offer_id.to_string())),
        }
    }

    async fn update_offer_status(
        &self,
        offer_id: &str,
        status: OfferStatus,
        transaction_id: Option<Txid>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SwapError> {
        let rows = self
            .update_status(
                offer_id,
                status,
                transaction_id.map(|t| t.to_string()),
                completed_at,
            )
            .await
            .map_err(store_err)?;
        if rows == 0 {
            let current = self.offer_by_id(offer_id).await?;
            return Err(SwapError::OfferNotAvailable {
                status: current.status,
            });
        }

        debug!("offer {} -> {}", offer_id, status);
        Ok(())
    }

    async fn claim_offer(&self, offer_id: &str, holder: &str, ttl: Duration) -> Result<(), SwapError> {
        let now = Utc::now();
        let until = claim_deadline(now, ttl)?;
        if self.claim(offer_id, holder, now, until).await.map_err(store_err)? > 0 {
            debug!("offer {} claimed by {} until {}", offer_id, holder, until);
            return Ok(());
        }

        let row = self
            .get_claim(offer_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| SwapError::OfferNotFound(offer_id.to_string()))?;
        match row.status.parse::<OfferStatus>()? {
            OfferStatus::Locked => Err(claim_denied(row.locked_by, row.locked_until, now)),
            status => Err(SwapError::OfferNotAvailable { status }),
        }
    }

    async fn release_offer(&self, offer_id: &str, holder: &str) -> Result<(), SwapError> {
        if self.release(offer_id, holder).await.map_err(store_err)? == 0 {
            debug!("offer {} not claimed by {}, nothing to release", offer_id, holder);
        }
        Ok(())
    }

    async fn record_fraud_attempt(&self, attempt: FraudAttempt) -> Result<(), SwapError> {
        self.insert_fraud_attempt(&FraudRow::from(&attempt))
            .await
            .map_err(store_err)
    }
}
