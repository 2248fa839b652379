use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, error, info_span, Instrument, Span};

use super::yahoo_types::{QuoteReply, QuoteRow};
use super::{decode_rows, endpoint_url, Connection, RateSource, Source};
use crate::config::{ConfigError, FeedSettings, TargetSpec, YAHOO_API_URL};
use crate::fetch::{browser_headers, Endpoint, Fetch, JsonFetcher, RequestSpec};
use crate::market_data::types::{RateQuote, TargetSet};

/// Quote feed: one request for all configured symbols.
pub struct YahooQuotes {
    fetcher: JsonFetcher,
    symbols: TargetSet,
    span: Span,
}

impl YahooQuotes {
    pub fn new(conn: &Connection, url: &str, symbols: impl Into<TargetSpec>) -> Result<Self, ConfigError> {
        let symbols = TargetSet::new("symbols", symbols)?;
        let endpoint = Endpoint::new(endpoint_url(url, YAHOO_API_URL))
            .with_params([("symbols", symbols.joined(","))])
            .with_headers(browser_headers(&conn.user_agent, true)?);
        Ok(Self {
            fetcher: JsonFetcher::new(conn.client.clone(), endpoint),
            symbols,
            span: info_span!("source", name = "YAHOO"),
        })
    }

    pub fn from_settings(conn: &Connection, settings: &FeedSettings) -> Result<Self, ConfigError> {
        Self::new(conn, &settings.url, settings.symbols.clone())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn symbols(&self) -> &TargetSet {
        &self.symbols
    }

    async fn rates(&self) -> IndexMap<String, RateQuote> {
        let Ok(payload) = self.fetcher.fetch(RequestSpec::new()).await else {
            return IndexMap::new();
        };
        match serde_json::from_value::<QuoteReply>(payload) {
            Ok(reply) => quotes_from_reply(reply, Utc::now()),
            Err(err) => {
                error!(error = %err, "unrecognized quote response");
                IndexMap::new()
            }
        }
    }
}

fn quote_from_row(row: QuoteRow, now: DateTime<Utc>) -> Option<RateQuote> {
    let symbol = row.symbol?;
    let price = row.regular_market_price.as_ref().and_then(|p| p.to_decimal())?;
    if price.is_sign_negative() {
        debug!(symbol = %symbol, %price, "skipping negative price");
        return None;
    }
    Some(RateQuote {
        display_name: row.short_name.unwrap_or_else(|| symbol.clone()),
        symbol,
        price,
        observed_at: now,
    })
}

pub(crate) fn quotes_from_reply(reply: QuoteReply, now: DateTime<Utc>) -> IndexMap<String, RateQuote> {
    match reply {
        QuoteReply::Quotes { quote_response } => decode_rows::<QuoteRow>("quotes", quote_response.result)
            .into_iter()
            .filter_map(|row| quote_from_row(row, now))
            .map(|quote| (quote.symbol.clone(), quote))
            .collect(),
        QuoteReply::Failure { finance } => {
            let (code, description) = finance
                .error
                .map(|e| (e.code.unwrap_or_default(), e.description.unwrap_or_default()))
                .unwrap_or_default();
            error!(%code, %description, "quote feed reported failure");
            IndexMap::new()
        }
    }
}

impl Source for YahooQuotes {
    fn source_name(&self) -> &'static str {
        "YAHOO"
    }

    fn source_url(&self) -> &'static str {
        "https://finance.yahoo.com/currencies/"
    }
}

#[async_trait::async_trait]
impl RateSource for YahooQuotes {
    async fn get_rates(&self) -> IndexMap<String, RateQuote> {
        self.rates().instrument(self.span.clone()).await
    }
}
