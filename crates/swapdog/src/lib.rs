pub mod btcrpc;
pub mod checker;
pub mod config;
pub mod dog;
pub mod locker;
pub mod repo;
pub mod sealer;
pub mod sender;

use anyhow::{anyhow, Result};
use bitcoin::{Transaction, TxOut, Txid};
use datatypes::{types, SwapError};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
