use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{ConfigError, TargetSpec};
use crate::fetch::FetchError;

/// Balance reported in place of a failed lookup by [`WalletBalances::sentinel_view`].
pub const FAILED_BALANCE: i128 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateQuote {
    pub symbol: String,
    pub display_name: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketMetadata {
    pub short_name: String,
    pub full_name: String,
}

/// Best ask and best bid only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBookTop {
    pub market_label: String,
    pub ask_price: Decimal,
    pub ask_volume_factor: Decimal,
    pub bid_price: Decimal,
    pub bid_volume_factor: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// A transfer of the tracked token, seen from the queried wallet.
/// `amount` is negative when the wallet sent the tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub counterparty_address: String,
    pub timestamp: DateTime<Utc>,
    pub amount: i128,
}

/// Why a single item inside a batch produced no value.
#[derive(Debug, thiserror::Error)]
pub enum ItemFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected payload shape: {0}")]
    Schema(String),
    #[error("provider reported failure: {0}")]
    Provider(String),
}

impl From<serde_json::Error> for ItemFailure {
    fn from(err: serde_json::Error) -> Self {
        ItemFailure::Schema(err.to_string())
    }
}

pub type ItemResult<T> = Result<T, ItemFailure>;

/// Raw token balances (base units) per requested wallet, in request order.
#[derive(Debug, Default)]
pub struct WalletBalances(pub IndexMap<String, ItemResult<i128>>);

impl WalletBalances {
    pub fn get(&self, wallet: &str) -> Option<&ItemResult<i128>> {
        self.0.get(wallet)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every wallet mapped to its balance, or to `-1` when the lookup failed.
    pub fn sentinel_view(&self) -> IndexMap<String, i128> {
        self.0
            .iter()
            .map(|(wallet, balance)| (wallet.clone(), *balance.as_ref().unwrap_or(&FAILED_BALANCE)))
            .collect()
    }

    /// Sum over wallets whose lookup succeeded, with the number of such wallets.
    pub fn successful_total(&self) -> (i128, usize) {
        self.0
            .values()
            .filter_map(|balance| balance.as_ref().ok())
            .fold((0, 0), |(sum, count), amount| (sum + amount, count + 1))
    }
}

/// Recent transfers per requested wallet, most recent first as the source returns them.
#[derive(Debug, Default)]
pub struct WalletTransactions(pub IndexMap<String, ItemResult<Vec<TransactionRecord>>>);

impl WalletTransactions {
    pub fn get(&self, wallet: &str) -> Option<&ItemResult<Vec<TransactionRecord>>> {
        self.0.get(wallet)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Failed wallets collapse to an empty list.
    pub fn lossy_view(&self) -> IndexMap<String, Vec<TransactionRecord>> {
        self.0
            .iter()
            .map(|(wallet, records)| (wallet.clone(), records.as_ref().map(Clone::clone).unwrap_or_default()))
            .collect()
    }
}

/// Validated, non-empty list of symbols, wallets or pairs an adapter is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    items: Vec<String>,
}

impl TargetSet {
    pub fn new(what: &'static str, spec: impl Into<TargetSpec>) -> Result<Self, ConfigError> {
        let mut items = spec.into().into_vec();
        let mut seen = std::collections::HashSet::new();
        items.retain(|item| seen.insert(item.clone()));
        if items.is_empty() {
            return Err(ConfigError::EmptyTargetSet(what));
        }
        Ok(Self { items })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.iter().any(|i| i == item)
    }

    pub fn joined(&self, sep: &str) -> String {
        self.items.join(sep)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<String>> for TargetSpec {
    fn from(items: Vec<String>) -> Self {
        TargetSpec::List(items)
    }
}

impl From<Vec<&str>> for TargetSpec {
    fn from(items: Vec<&str>) -> Self {
        TargetSpec::List(items.into_iter().map(str::to_string).collect())
    }
}
