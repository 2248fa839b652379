use serde::Deserialize;
use tracing::{error, info_span, warn, Instrument, Span};

use super::{endpoint_url, Connection, DepthSource, Source};
use crate::config::{ConfigError, GarantexSettings, GARANTEX_API_URL};
use crate::fetch::{browser_headers, Endpoint, Fetch, JsonFetcher, RequestSpec};
use crate::market_data::normaliser::{utc_from_secs, WireDecimal};
use crate::market_data::types::OrderBookTop;

// Source: https://garantex.io/api/v2/depth?market=usdtrub
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DepthReply {
    Book { timestamp: i64, asks: Vec<DepthRow>, bids: Vec<DepthRow> },
    Failure { error: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct DepthRow {
    price: WireDecimal,
    factor: WireDecimal,
}

/// Order-book feed: top row of one market.
pub struct GarantexDepth {
    fetcher: JsonFetcher,
    market_label: String,
    span: Span,
}

impl GarantexDepth {
    pub fn new(conn: &Connection, url: &str, market: &str) -> Result<Self, ConfigError> {
        let market = market.trim();
        if market.is_empty() {
            return Err(ConfigError::EmptyTargetSet("market"));
        }
        let endpoint = Endpoint::new(endpoint_url(url, GARANTEX_API_URL))
            .with_params([("market", market)])
            .with_headers(browser_headers(&conn.user_agent, true)?);
        Ok(Self {
            fetcher: JsonFetcher::new(conn.client.clone(), endpoint),
            market_label: market.to_uppercase(),
            span: info_span!("source", name = "GARANTEX"),
        })
    }

    pub fn from_settings(conn: &Connection, settings: &GarantexSettings) -> Result<Self, ConfigError> {
        Self::new(conn, &settings.url, &settings.market)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.market_label = label.into();
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn depth(&self) -> Option<OrderBookTop> {
        let payload = self.fetcher.fetch(RequestSpec::new()).await.ok()?;
        match serde_json::from_value::<DepthReply>(payload) {
            Ok(reply) => top_of_book(reply, &self.market_label),
            Err(err) => {
                error!(error = %err, "unrecognized depth response");
                None
            }
        }
    }
}

fn top_of_book(reply: DepthReply, label: &str) -> Option<OrderBookTop> {
    let (timestamp, asks, bids) = match reply {
        DepthReply::Book { timestamp, asks, bids } => (timestamp, asks, bids),
        DepthReply::Failure { error } => {
            error!(%error, "depth feed reported failure");
            return None;
        }
    };
    let (Some(ask), Some(bid)) = (asks.first(), bids.first()) else {
        warn!(asks = asks.len(), bids = bids.len(), "order book side is empty");
        return None;
    };
    let top = (|| {
        Some(OrderBookTop {
            market_label: label.to_string(),
            ask_price: ask.price.to_decimal()?,
            ask_volume_factor: ask.factor.to_decimal()?,
            bid_price: bid.price.to_decimal()?,
            bid_volume_factor: bid.factor.to_decimal()?,
            observed_at: utc_from_secs(timestamp)?,
        })
    })();
    if top.is_none() {
        error!(?ask, ?bid, timestamp, "top of book has malformed values");
    }
    top
}

impl Source for GarantexDepth {
    fn source_name(&self) -> &'static str {
        "GARANTEX"
    }

    fn source_url(&self) -> &'static str {
        "https://garantex.io/"
    }
}

#[async_trait::async_trait]
impl DepthSource for GarantexDepth {
    async fn get_depth(&self) -> Option<OrderBookTop> {
        self.depth().instrument(self.span.clone()).await
    }
}
