use anyhow::{anyhow, Context, Result};
use bitcoin::Network;
use bittx::builder::purchase::{ChangePolicy, MarketParams};
use bittx::keys::AuxRandPolicy;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::{fs, str::FromStr, time::Duration};

#[derive(Parser, Debug)]
#[command(name = "swapdog", about = "Settles psbt ordinal swaps")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the offer and fraud tables
    InitDb,
    /// Sign a listing for an asset the configured seed controls and store the offer
    List {
        #[arg(long)]
        offer_id: String,
        /// Asset outpoint as txid:vout
        #[arg(long)]
        outpoint: String,
        /// Price in sats
        #[arg(long)]
        price: u64,
        /// Payment address, defaults to the asset's own address
        #[arg(long)]
        seller_address: Option<String>,
    },
    /// Draft an unsigned purchase psbt for a buyer
    Draft {
        #[arg(long)]
        offer_id: String,
        #[arg(long)]
        buyer_address: String,
        /// sat/vB
        #[arg(long, default_value_t = 2.0)]
        fee_rate: f64,
    },
    /// Validate, unseal, finalize and broadcast a buyer-signed purchase
    Execute {
        #[arg(long)]
        offer_id: String,
        /// Buyer identity used as the lock holder
        #[arg(long)]
        buyer: String,
        /// Base64 psbt, or @path to read it from a file
        #[arg(long)]
        psbt: String,
    },
    /// Print an offer's status
    Status {
        #[arg(long)]
        offer_id: String,
    },
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub bitcoin: BitcoinConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    pub database: DBConfig,
    pub market: MarketConfig,
    pub signer: SignerConfig,
    pub sealer: SealerConfig,
    pub tgbot: Option<TgBot>,
}

#[derive(Deserialize, Debug)]
pub struct BitcoinConfig {
    pub network: String,
    pub endpoint: String,
    pub user: String,
    pub pass: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct BroadcastConfig {
    /// Tried in order after the node.
    #[serde(default)]
    pub relays: Vec<RelayConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RelayConfig {
    pub name: String,
    pub url: String,
}

#[derive(Deserialize, Debug)]
pub struct DBConfig {
    pub url: String,
}

#[derive(Deserialize, Debug)]
pub struct MarketConfig {
    pub fee_address: String,
    pub fee_bps: u64,
    #[serde(default = "default_dust_limit")]
    pub dust_limit: u64,
    #[serde(default = "default_change_policy")]
    pub change_policy: String,
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

#[derive(Deserialize, Debug)]
pub struct SignerConfig {
    pub seed: String,
    pub derivation_paths: Vec<String>,
    #[serde(default = "default_aux_rand")]
    pub aux_rand: String,
}

#[derive(Deserialize, Debug)]
pub struct SealerConfig {
    pub master_key: String,
}

#[derive(Deserialize, Debug)]
pub struct TgBot {
    pub token: String,
    pub chat_id: i64,
    pub sold_topic_id: i32,
    pub fraud_topic_id: i32,
}

fn default_dust_limit() -> u64 {
    bittx::DUST_LIMIT_SATS
}

fn default_change_policy() -> String {
    "pin_to_dust".to_string()
}

fn default_lock_ttl() -> u64 {
    120
}

fn default_aux_rand() -> String {
    "zero".to_string()
}

impl Config {
    pub fn network(&self) -> Result<Network> {
        Network::from_str(&self.bitcoin.network)
            .map_err(|e| anyhow!("bad network {}: {}", self.bitcoin.network, e))
    }

    pub fn market_params(&self) -> Result<MarketParams> {
        let network = self.network()?;
        Ok(MarketParams {
            fee_address: bittx::parse_address(&self.market.fee_address, network)?,
            fee_bps: self.market.fee_bps,
            dust_limit: self.market.dust_limit,
            change_policy: ChangePolicy::from_str(&self.market.change_policy)?,
        })
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.market.lock_ttl_secs)
    }

    pub fn aux_rand(&self) -> Result<AuxRandPolicy> {
        Ok(AuxRandPolicy::from_str(&self.signer.aux_rand)?)
    }

    pub fn seed(&self) -> Result<Vec<u8>> {
        hex::decode(&self.signer.seed).context("signer seed is not hex")
    }

    pub fn master_key(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.sealer.master_key).context("master key is not hex")?;
        bytes
            .try_into()
            .map_err(|_| anyhow!("master key must be 32 bytes"))
    }
}

pub fn read_config() -> Result<(Cli, Config)> {
    let args = Cli::parse();
    let cfg = load_config(&args.config)?;
    Ok((args, cfg))
}

pub fn load_config(path: &str) -> Result<Config> {
    let config_content =
        fs::read_to_string(path).with_context(|| format!("failed to read config file {path}"))?;
    let config: Config = toml::from_str(&config_content)
        .with_context(|| format!("failed to parse config file {path}"))?;

    Ok(config)
}
