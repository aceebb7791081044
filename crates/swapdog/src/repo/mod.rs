pub mod memory;
pub mod offer;
pub mod offer_dao;

use super::*;
use crate::config;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, Executor, FromRow, Pool, Postgres};
use types::{FraudAttempt, Offer, OfferStatus};

pub use memory::MemoryOfferStore;

/// Offer persistence the settlement flow depends on.
#[async_trait]
pub trait OfferStore: Send + Sync {
    async fn offer_by_id(&self, offer_id: &str) -> Result<Offer, SwapError>;

    /// Terminal offers are never overwritten.
    async fn update_offer_status(
        &self,
        offer_id: &str,
        status: OfferStatus,
        transaction_id: Option<Txid>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SwapError>;

    /// Locks the offer for `holder` until `ttl` passes.
    ///
    /// Succeeds from active, on the holder's own claim, or on an expired
    /// claim. A live claim of another holder is `LockDenied`. This is the
    /// cross-process half of purchase locking.
    async fn claim_offer(&self, offer_id: &str, holder: &str, ttl: Duration) -> Result<(), SwapError>;

    /// Returns the offer to active if `holder` still owns the claim.
    async fn release_offer(&self, offer_id: &str, holder: &str) -> Result<(), SwapError>;

    async fn record_fraud_attempt(&self, attempt: FraudAttempt) -> Result<(), SwapError>;
}

pub async fn conn_pool(cfg: &config::DBConfig) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPool::connect(&cfg.url).await
}

pub async fn create_table(pool: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS offers (
            offer_id TEXT PRIMARY KEY,
            tx_id TEXT NOT NULL,
            vout INTEGER NOT NULL,
            value BIGINT NOT NULL,
            script_pubkey TEXT NOT NULL,
            price BIGINT NOT NULL,
            seller_address TEXT NOT NULL,
            ciphertext TEXT NOT NULL,
            wrapped_key TEXT NOT NULL,
            sighash_mode SMALLINT NOT NULL,
            status TEXT NOT NULL,
            transaction_id TEXT,
            completed_at TIMESTAMPTZ,
            locked_by TEXT,
            locked_until TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .await?;

    pool.execute(
        "CREATE TABLE IF NOT EXISTS fraud_attempts (
            id BIGSERIAL PRIMARY KEY,
            offer_id TEXT NOT NULL,
            buyer TEXT NOT NULL,
            reasons TEXT NOT NULL,
            psbt_digest TEXT NOT NULL,
            detected_at TIMESTAMPTZ NOT NULL
        )",
    )
    .await?;

    Ok(())
}

pub struct Dao {
    pool: Pool<Postgres>,
}

impl Dao {
    pub fn new(pool: Pool<Postgres>) -> Dao {
        Dao { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> SwapError {
    SwapError::Store(e.to_string())
}

fn claim_deadline(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, SwapError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| SwapError::Store(format!("lock ttl {ttl:?} out of range")))
}

fn claim_denied(holder: Option<String>, until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SwapError {
    SwapError::LockDenied {
        holder: holder.unwrap_or_default(),
        expires_in: until
            .and_then(|until| (until - now).to_std().ok())
            .unwrap_or_default(),
    }
}
