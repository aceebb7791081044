pub mod list;
pub mod settle;

use super::*;
use crate::{
    checker::SecurityValidator, locker::PurchaseLocks, repo::OfferStore, sealer::SignatureSealer,
    sender::tx::TxSender,
};
use bitcoin::Network;
use bittx::builder::purchase::MarketParams;
use tgbot::TgBot;

/// Settles purchases for stored offers.
pub struct SwapDog {
    network: Network,
    market: MarketParams,
    store: Arc<dyn OfferStore>,
    locks: Arc<PurchaseLocks>,
    validator: SecurityValidator,
    sealer: SignatureSealer,
    sender: TxSender,
    notifier: Option<TgBot>,
    lock_ttl: Duration,
}

impl SwapDog {
    pub fn new(
        network: Network,
        market: MarketParams,
        store: Arc<dyn OfferStore>,
        locks: Arc<PurchaseLocks>,
        sealer: SignatureSealer,
        sender: TxSender,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            network,
            validator: SecurityValidator::new(network, market.clone()),
            market,
            store,
            locks,
            sealer,
            sender,
            notifier: None,
            lock_ttl,
        }
    }

    pub fn with_notifier(mut self, notifier: TgBot) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn sealer(&self) -> &SignatureSealer {
        &self.sealer
    }

    pub fn store(&self) -> &Arc<dyn OfferStore> {
        &self.store
    }
}
