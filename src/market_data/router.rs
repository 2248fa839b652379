// Router builds every configured adapter and runs the requested sections side by side
use std::fmt;

use futures::future::join_all;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ConfigError, Settings, WalletFeedSettings};
use crate::market_data::adapters::{
    BscScanWallets, Connection, DepthSource, GarantexDepth, MoexRates, PageScraper, RateSource, TronWallets,
    WalletSource, XeRates, YahooQuotes,
};
use crate::market_data::normaliser::scale_amount;
use crate::market_data::types::{ItemResult, OrderBookTop, RateQuote, TransactionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Rates,
    Depth,
    Wallets,
    Pages,
    All,
}

impl Section {
    fn includes(self, other: Section) -> bool {
        self == Section::All || self == other
    }
}

/// Successful value or the reason this one item failed.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Entry<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> Entry<T> {
    fn from_result<U>(result: &ItemResult<U>, map: impl FnOnce(&U) -> Option<T>) -> Self {
        match result {
            Ok(value) => match map(value) {
                Some(mapped) => Entry::Ok(mapped),
                None => Entry::Failed { error: "value out of range".to_string() },
            },
            Err(err) => Entry::Failed { error: err.to_string() },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RatesSection {
    pub source: &'static str,
    pub url: &'static str,
    pub quotes: IndexMap<String, RateQuote>,
}

#[derive(Debug, Serialize)]
pub struct DepthSection {
    pub source: &'static str,
    pub url: &'static str,
    pub top: Option<OrderBookTop>,
}

#[derive(Debug, Serialize)]
pub struct WalletEntry {
    pub balance: Entry<Decimal>,
    pub transactions: Entry<Vec<TransactionRecord>>,
}

#[derive(Debug, Serialize)]
pub struct WalletSection {
    pub source: &'static str,
    pub url: &'static str,
    pub decimals: u32,
    pub wallets: IndexMap<String, WalletEntry>,
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rates: Vec<RatesSection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depth: Vec<DepthSection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub wallets: Vec<WalletSection>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub pages: IndexMap<String, Entry<String>>,
}

/// Adapters built from settings. Construction errors surface before any request is made.
pub struct Feeds {
    rates: Vec<Box<dyn RateSource>>,
    depth: Vec<Box<dyn DepthSource>>,
    wallets: Vec<Box<dyn WalletSource>>,
    pages: Option<PageScraper>,
}

fn has_wallets(settings: &WalletFeedSettings) -> bool {
    !settings.wallets.clone().into_vec().is_empty()
}

impl Feeds {
    pub fn from_settings(settings: &Settings, section: Section) -> Result<Self, ConfigError> {
        let conn = Connection::new(&settings.http)?;
        let mut feeds = Feeds { rates: Vec::new(), depth: Vec::new(), wallets: Vec::new(), pages: None };

        if section.includes(Section::Rates) {
            feeds.rates.push(Box::new(YahooQuotes::from_settings(&conn, &settings.yahoo)?));
            feeds.rates.push(Box::new(MoexRates::from_settings(&conn, &settings.moex)?));
            feeds.rates.push(Box::new(XeRates::from_settings(&conn, &settings.xe)?));
        }
        if section.includes(Section::Depth) {
            feeds.depth.push(Box::new(GarantexDepth::from_settings(&conn, &settings.garantex)?));
        }
        if section.includes(Section::Wallets) {
            if has_wallets(&settings.tron) {
                feeds.wallets.push(Box::new(TronWallets::from_settings(&conn, &settings.tron)?));
            } else {
                info!("no tron wallets configured");
            }
            if has_wallets(&settings.bscscan) {
                feeds.wallets.push(Box::new(BscScanWallets::from_settings(&conn, &settings.bscscan)?));
            } else {
                info!("no bscscan wallets configured");
            }
        }
        if section.includes(Section::Pages) {
            if settings.pages.is_empty() {
                info!("no pages configured");
            } else {
                feeds.pages = Some(PageScraper::from_settings(&conn, &settings.pages)?);
            }
        }
        Ok(feeds)
    }

    /// Run every built adapter concurrently; one feed failing never hides the others.
    pub async fn collect(&self) -> Report {
        let (rates, depth, wallets, pages) = tokio::join!(
            join_all(self.rates.iter().map(|src| rates_section(src.as_ref()))),
            join_all(self.depth.iter().map(|src| depth_section(src.as_ref()))),
            join_all(self.wallets.iter().map(|src| wallet_section(src.as_ref()))),
            pages_section(self.pages.as_ref()),
        );
        Report { rates, depth, wallets, pages }
    }
}

async fn rates_section(source: &dyn RateSource) -> RatesSection {
    let quotes = source.get_rates().await;
    if quotes.is_empty() {
        warn!(source = source.source_name(), "no quotes");
    }
    RatesSection { source: source.source_name(), url: source.source_url(), quotes }
}

async fn depth_section(source: &dyn DepthSource) -> DepthSection {
    DepthSection { source: source.source_name(), url: source.source_url(), top: source.get_depth().await }
}

/// Balances and transfers go out as two batches, one after the other, so a provider sees one staggered batch at a time.
async fn wallet_section(source: &dyn WalletSource) -> WalletSection {
    let balances = source.get_balances().await;
    let transactions = source.get_transactions().await;
    let decimals = source.decimals();
    let wallets = balances
        .0
        .iter()
        .map(|(wallet, balance)| {
            let transactions = match transactions.get(wallet) {
                Some(result) => Entry::from_result(result, |txs: &Vec<TransactionRecord>| Some(txs.clone())),
                None => Entry::Failed { error: "missing from transaction batch".to_string() },
            };
            let balance = Entry::from_result(balance, |raw: &i128| scale_amount(*raw, decimals));
            (wallet.clone(), WalletEntry { balance, transactions })
        })
        .collect();
    WalletSection { source: source.source_name(), url: source.source_url(), decimals, wallets }
}

async fn pages_section(scraper: Option<&PageScraper>) -> IndexMap<String, Entry<String>> {
    let Some(scraper) = scraper else {
        return IndexMap::new();
    };
    scraper
        .get_pages()
        .await
        .into_iter()
        .map(|(url, result)| (url, Entry::from_result(&result, |text: &String| Some(text.clone()))))
        .collect()
}

impl<T: fmt::Display> fmt::Display for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Ok(value) => write!(f, "{value}"),
            Entry::Failed { error } => write!(f, "FAILED ({error})"),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.rates {
            writeln!(f, "== {} rates ({})", section.source, section.url)?;
            for (key, q) in &section.quotes {
                writeln!(f, "  {key:<14} {:<24} {:>16}  {}", q.display_name, q.price, q.observed_at.to_rfc3339())?;
            }
        }
        for section in &self.depth {
            writeln!(f, "== {} depth ({})", section.source, section.url)?;
            match &section.top {
                Some(top) => writeln!(
                    f,
                    "  {}  ask {} (x{})  bid {} (x{})  {}",
                    top.market_label,
                    top.ask_price,
                    top.ask_volume_factor,
                    top.bid_price,
                    top.bid_volume_factor,
                    top.observed_at.to_rfc3339()
                )?,
                None => writeln!(f, "  no order book")?,
            }
        }
        for section in &self.wallets {
            writeln!(f, "== {} wallets ({})", section.source, section.url)?;
            for (wallet, entry) in &section.wallets {
                writeln!(f, "  {wallet}  balance {}", entry.balance)?;
                match &entry.transactions {
                    Entry::Ok(txs) => {
                        for tx in txs {
                            let amount = scale_amount(tx.amount, section.decimals).unwrap_or_default();
                            writeln!(
                                f,
                                "    {}  {:>20}  {}",
                                tx.timestamp.to_rfc3339(),
                                amount,
                                tx.counterparty_address
                            )?;
                        }
                    }
                    Entry::Failed { error } => writeln!(f, "    transactions FAILED ({error})")?,
                }
            }
        }
        if !self.pages.is_empty() {
            writeln!(f, "== pages")?;
            for (url, entry) in &self.pages {
                writeln!(f, "  {url}  {entry}")?;
            }
        }
        Ok(())
    }
}
