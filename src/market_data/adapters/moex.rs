use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, error, info_span, warn, Instrument, Span};

use super::moex_types::{IssReply, MarketDataRow, SecurityRow, ISS_PARAMS};
use super::{decode_rows, endpoint_url, Connection, RateSource, Source};
use crate::config::{ConfigError, FeedSettings, TargetSpec, MOEX_API_URL};
use crate::fetch::{browser_headers, Endpoint, Fetch, JsonFetcher, RequestSpec};
use crate::market_data::normaliser::moscow_to_utc;
use crate::market_data::types::{MarketMetadata, RateQuote, TargetSet};

/// Exchange feed: security metadata joined with market data, keyed by security id.
pub struct MoexRates {
    fetcher: JsonFetcher,
    symbols: TargetSet,
    span: Span,
}

impl MoexRates {
    pub fn new(conn: &Connection, url: &str, symbols: impl Into<TargetSpec>) -> Result<Self, ConfigError> {
        let symbols = TargetSet::new("symbols", symbols)?;
        let endpoint = Endpoint::new(endpoint_url(url, MOEX_API_URL))
            .with_params(ISS_PARAMS)
            .with_headers(browser_headers(&conn.user_agent, true)?);
        Ok(Self {
            fetcher: JsonFetcher::new(conn.client.clone(), endpoint),
            symbols,
            span: info_span!("source", name = "MOEX"),
        })
    }

    pub fn from_settings(conn: &Connection, settings: &FeedSettings) -> Result<Self, ConfigError> {
        Self::new(conn, &settings.url, settings.symbols.clone())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn rates(&self) -> IndexMap<String, RateQuote> {
        let Ok(payload) = self.fetcher.fetch(RequestSpec::new()).await else {
            return IndexMap::new();
        };
        match serde_json::from_value::<IssReply>(payload) {
            Ok(reply) => join_quotes(reply, &self.symbols),
            Err(err) => {
                error!(error = %err, "unrecognized securities response");
                IndexMap::new()
            }
        }
    }
}

fn quote_from_row(row: &MarketDataRow, metadata: &HashMap<String, MarketMetadata>) -> Option<RateQuote> {
    let MarketDataRow(price, _update_time, secid, systime) = row;
    let price = price.as_ref().and_then(|p| p.to_decimal())?;
    if price.is_zero() || price.is_sign_negative() {
        debug!(secid = %secid, %price, "skipping row without a usable price");
        return None;
    }
    let Some(meta) = metadata.get(secid) else {
        warn!(secid = %secid, "market data row has no matching security");
        return None;
    };
    let Some(observed_at) = systime.as_deref().and_then(moscow_to_utc) else {
        warn!(secid = %secid, systime = ?systime, "market data row has no valid SYSTIME");
        return None;
    };
    Some(RateQuote {
        symbol: meta.short_name.clone(),
        display_name: meta.full_name.clone(),
        price,
        observed_at,
    })
}

pub(crate) fn join_quotes(reply: IssReply, symbols: &TargetSet) -> IndexMap<String, RateQuote> {
    let metadata: HashMap<String, MarketMetadata> = decode_rows::<SecurityRow>("securities", reply.securities.data)
        .into_iter()
        .map(|row| {
            let short_name = row.1.unwrap_or_else(|| row.0.clone());
            let full_name = row.2.unwrap_or_else(|| short_name.clone());
            (row.0, MarketMetadata { short_name, full_name })
        })
        .collect();

    decode_rows::<MarketDataRow>("marketdata", reply.marketdata.data)
        .iter()
        .filter(|row| symbols.contains(&row.2))
        .filter_map(|row| quote_from_row(row, &metadata).map(|quote| (row.2.clone(), quote)))
        .collect()
}

impl Source for MoexRates {
    fn source_name(&self) -> &'static str {
        "MOEX"
    }

    fn source_url(&self) -> &'static str {
        "https://www.moex.com/ru/markets/currency/"
    }
}

#[async_trait::async_trait]
impl RateSource for MoexRates {
    async fn get_rates(&self) -> IndexMap<String, RateQuote> {
        self.rates().instrument(self.span.clone()).await
    }
}
