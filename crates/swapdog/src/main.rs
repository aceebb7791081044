use anyhow::{anyhow, Result};
use bitcoin::{Address, Amount, OutPoint};
use bittx::keys::select_signing_key;
use bittx::psbt::{decode_psbt, encode_psbt};
use mempool::EsploraClient;
use std::{fs, str::FromStr, sync::Arc};
use swapdog::{
    btcrpc::BtcCli,
    config::{self, Command, Config},
    dog::{list::list_offer, SwapDog},
    locker::PurchaseLocks,
    repo::{self, Dao, OfferStore},
    sealer::SignatureSealer,
    sender::tx::TxSender,
};
use tgbot::TgBot;
use tracing::{error, info, warn};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // TIPS: guard must have same long lifetime with main
    let _guard = logger_init();

    let (args, cfg) = config::read_config()?;
    match args.command {
        Command::InitDb => {
            let pool = repo::conn_pool(&cfg.database).await?;
            repo::create_table(&pool).await?;
            info!("offer tables ready");
        }
        Command::List {
            offer_id,
            outpoint,
            price,
            seller_address,
        } => list(&cfg, &offer_id, &outpoint, price, seller_address).await?,
        Command::Draft {
            offer_id,
            buyer_address,
            fee_rate,
        } => {
            let network = cfg.network()?;
            let buyer = bittx::parse_address(&buyer_address, network)?;
            let client = match cfg.broadcast.relays.first() {
                Some(relay) => EsploraClient::new(&relay.url)?,
                None => EsploraClient::mainnet()?,
            };
            let dog = build_dog(&cfg).await?;
            let psbt = dog
                .draft_purchase(&client, &offer_id, &buyer, fee_rate)
                .await?;
            println!("{}", encode_psbt(&psbt));
        }
        Command::Execute {
            offer_id,
            buyer,
            psbt,
        } => {
            let encoded = match psbt.strip_prefix('@') {
                Some(path) => fs::read_to_string(path)?,
                None => psbt,
            };
            let psbt = decode_psbt(encoded.trim())?;
            let dog = build_dog(&cfg).await?;
            match dog.execute_purchase(&offer_id, &buyer, psbt).await {
                Ok(txid) => println!("{}", txid),
                Err(e) if e.is_retryable() => {
                    warn!("purchase of {} can be retried: {}", offer_id, e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("purchase of {} rejected: {}", offer_id, e);
                    return Err(e.into());
                }
            }
        }
        Command::Status { offer_id } => {
            let dao = Dao::new(repo::conn_pool(&cfg.database).await?);
            let offer = dao.offer_by_id(&offer_id).await?;
            let status = serde_json::json!({
                "offer_id": offer.offer_id,
                "outpoint": offer.inscription_utxo.out_point.to_string(),
                "price": offer.price.to_sat(),
                "seller_address": offer.seller_address,
                "status": offer.status.as_str(),
                "transaction_id": offer.transaction_id.map(|t| t.to_string()),
                "completed_at": offer.completed_at.map(|t| t.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

async fn list(
    cfg: &Config,
    offer_id: &str,
    outpoint: &str,
    price: u64,
    seller_address: Option<String>,
) -> Result<()> {
    let network = cfg.network()?;
    let node = BtcCli::new(&cfg.bitcoin.endpoint, &cfg.bitcoin.user, &cfg.bitcoin.pass)?;
    let out_point = OutPoint::from_str(outpoint)?;
    let asset = node
        .get_unspent_utxo(&out_point)?
        .ok_or_else(|| anyhow!("{} is spent or unknown", outpoint))?;

    let selected = select_signing_key(
        &cfg.seed()?,
        &cfg.signer.derivation_paths,
        network,
        &asset.script_pubkey,
    )?;
    let seller = match seller_address {
        Some(addr) => bittx::parse_address(&addr, network)?,
        None => Address::from_script(&asset.script_pubkey, network)?,
    };

    let sealer = SignatureSealer::new(cfg.master_key()?);
    let offer = list_offer(
        offer_id,
        &asset,
        &seller,
        Amount::from_sat(price),
        &selected.internal,
        cfg.aux_rand()?,
        &sealer,
    )?;

    let dao = Dao::new(repo::conn_pool(&cfg.database).await?);
    dao.insert_offer(&offer).await?;
    info!("offer {} stored, key from {}", offer_id, selected.path);
    Ok(())
}

async fn build_dog(cfg: &Config) -> Result<SwapDog> {
    let node = Arc::new(BtcCli::new(
        &cfg.bitcoin.endpoint,
        &cfg.bitcoin.user,
        &cfg.bitcoin.pass,
    )?);
    match node.get_best_block_height() {
        Ok(height) => info!("node at height {}", height),
        Err(e) => warn!("node unreachable, relying on relays: {}", e),
    }

    let sender = TxSender::from_config(cfg, node).await?;
    let store = Arc::new(Dao::new(repo::conn_pool(&cfg.database).await?));
    let mut dog = SwapDog::new(
        cfg.network()?,
        cfg.market_params()?,
        store,
        Arc::new(PurchaseLocks::new()),
        SignatureSealer::new(cfg.master_key()?),
        sender,
        cfg.lock_ttl(),
    );

    if let Some(tg) = cfg.tgbot.as_ref().filter(|tg| !tg.token.is_empty()) {
        dog = dog.with_notifier(TgBot::new(
            &tg.token,
            tg.chat_id,
            tg.sold_topic_id,
            tg.fraud_topic_id,
        ));
    }
    Ok(dog)
}

fn logger_init() -> WorkerGuard {
    let formatting_layer = fmt::layer().pretty().with_writer(std::io::stdout);
    let file_appender = RollingFileAppender::new(Rotation::HOURLY, "logs/swapdog", "swapdog.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG)
        .boxed();

    Registry::default()
        .with(formatting_layer)
        .with(file_layer)
        .with(EnvFilter::from_default_env())
        .init();

    guard
}
