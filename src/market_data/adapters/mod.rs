// Shared traits + helpers for provider adapters
use indexmap::IndexMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ConfigError, HttpSettings};
use crate::fetch::{build_http_client, Slot, WALLET_CORRELATION_KEY};
use crate::market_data::types::{ItemFailure, ItemResult, OrderBookTop, RateQuote, WalletBalances, WalletTransactions};

/// Pooled client plus the identity every adapter sends. Clone it to share one pool.
#[derive(Clone, Debug)]
pub struct Connection {
    pub client: Client,
    pub user_agent: String,
}

impl Connection {
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        Ok(Self { client: build_http_client(settings)?, user_agent: settings.user_agent.clone() })
    }
}

pub trait Source {
    fn source_name(&self) -> &'static str;
    fn source_url(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait RateSource: Source + Send + Sync {
    /// Quotes keyed by the provider's native symbol. Rows that fail to map are skipped.
    async fn get_rates(&self) -> IndexMap<String, RateQuote>;
}

#[async_trait::async_trait]
pub trait DepthSource: Source + Send + Sync {
    async fn get_depth(&self) -> Option<OrderBookTop>;
}

#[async_trait::async_trait]
pub trait WalletSource: Source + Send + Sync {
    /// Token decimals; raw amounts are integers in base units.
    fn decimals(&self) -> u32;

    /// One entry per configured wallet, failures included.
    async fn get_balances(&self) -> WalletBalances;

    /// One entry per configured wallet, failures included.
    async fn get_transactions(&self) -> WalletTransactions;
}

pub(crate) fn endpoint_url(configured: &str, default: &str) -> String {
    if configured.trim().is_empty() {
        default.to_string()
    } else {
        configured.trim().to_string()
    }
}

/// Decode rows one by one; a row that does not fit `T` is logged and dropped, its siblings are kept.
pub(crate) fn decode_rows<T: DeserializeOwned>(what: &'static str, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .enumerate()
        .filter_map(|(idx, row)| match serde_json::from_value(row) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(what, idx, error = %err, "skipping malformed row");
                None
            }
        })
        .collect()
}

/// Attribute each slot to its wallet and map it through `parse`, logging failures.
pub(crate) fn settle_wallets<T>(
    source: &'static str,
    slots: Vec<Slot<Value>>,
    parse: impl Fn(&str, Value) -> ItemResult<T>,
) -> IndexMap<String, ItemResult<T>> {
    slots
        .into_iter()
        .map(|slot| {
            let (wallet, outcome) = slot.into_attributed(WALLET_CORRELATION_KEY);
            let result = outcome.map_err(ItemFailure::from).and_then(|payload| parse(&wallet, payload));
            match &result {
                Err(ItemFailure::Provider(msg)) => info!(source, wallet = %wallet, error = %msg, "provider reported failure"),
                Err(err) => warn!(source, wallet = %wallet, error = %err, "wallet lookup failed"),
                Ok(_) => {}
            }
            (wallet, result)
        })
        .collect()
}

pub mod bscscan;
pub mod bscscan_types;
pub mod garantex;
pub mod moex;
pub mod moex_types;
pub mod pages;
pub mod tron;
pub mod tron_types;
pub mod xe;
pub mod yahoo;
pub mod yahoo_types;

pub use bscscan::BscScanWallets;
pub use garantex::GarantexDepth;
pub use moex::MoexRates;
pub use pages::PageScraper;
pub use tron::TronWallets;
pub use xe::XeRates;
pub use yahoo::YahooQuotes;
