use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use itertools::Itertools;
use scraper::{Html, Selector};
use tracing::{debug, info_span, warn, Instrument, Span};

use super::{endpoint_url, Connection, RateSource, Source};
use crate::config::{ConfigError, TargetSpec, XeSettings, XE_CURRENCIES, XE_URL};
use crate::fetch::{browser_headers, dispatch_many, Endpoint, RequestSpec, Stagger, TextFetcher};
use crate::market_data::normaliser::parse_locale_decimal;
use crate::market_data::types::{RateQuote, TargetSet};

/// Converter result paragraph, e.g. `1 RUB = 0.010869 USD`.
pub const XE_RATE_SELECTOR: &str = "#__next > div:nth-of-type(2) > div:nth-of-type(2) > section > \
    div:nth-of-type(2) > div > main > form > div:nth-of-type(2) > div:nth-of-type(3) > \
    div:nth-of-type(1) > div:nth-of-type(1) > p:nth-of-type(1)";

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|err| ConfigError::InvalidSelector { selector: selector.to_string(), reason: err.to_string() })
}

/// Every ordered `A/B` pair over `currencies`.
pub fn supported_pairs(currencies: &TargetSet) -> Vec<String> {
    currencies.iter().permutations(2).map(|pair| format!("{}/{}", pair[0], pair[1])).collect()
}

/// Converter pages scraped for one rate each.
pub struct XeRates {
    fetcher: TextFetcher,
    pairs: TargetSet,
    selector: String,
    span: Span,
}

impl XeRates {
    pub fn new(
        conn: &Connection,
        url: &str,
        currencies: impl Into<TargetSpec>,
        pairs: impl Into<TargetSpec>,
    ) -> Result<Self, ConfigError> {
        let currencies = TargetSet::new("currencies", currencies)?;
        let pairs = TargetSet::new("pairs", pairs)?;
        let supported = supported_pairs(&currencies);
        let unsupported: Vec<String> =
            pairs.iter().filter(|pair| !supported.iter().any(|s| s.as_str() == *pair)).map(str::to_string).collect();
        if !unsupported.is_empty() {
            return Err(ConfigError::UnsupportedPairs(unsupported));
        }
        let endpoint =
            Endpoint::new(endpoint_url(url, XE_URL)).with_headers(browser_headers(&conn.user_agent, false)?);
        Ok(Self {
            fetcher: TextFetcher::new(conn.client.clone(), endpoint),
            pairs,
            selector: XE_RATE_SELECTOR.to_string(),
            span: info_span!("source", name = "XE"),
        })
    }

    pub fn from_settings(conn: &Connection, settings: &XeSettings) -> Result<Self, ConfigError> {
        let currencies = match &settings.currencies {
            TargetSpec::Joined(s) if s.trim().is_empty() => XE_CURRENCIES.into(),
            other => other.clone(),
        };
        let reader = Self::new(conn, &settings.url, currencies, settings.pairs.clone())?;
        match settings.selector.as_deref() {
            Some(selector) => reader.with_selector(selector),
            None => Ok(reader),
        }
    }

    pub fn with_selector(mut self, selector: &str) -> Result<Self, ConfigError> {
        parse_selector(selector)?;
        self.selector = selector.to_string();
        Ok(self)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn pairs(&self) -> &TargetSet {
        &self.pairs
    }

    fn targets(&self) -> IndexMap<String, RequestSpec> {
        self.pairs
            .iter()
            .filter_map(|pair| {
                let (base, quote) = pair.split_once('/')?;
                let request = RequestSpec::new().params([("Amount", "1"), ("From", quote), ("To", base)]);
                Some((pair.to_string(), request))
            })
            .collect()
    }

    async fn rates(&self) -> IndexMap<String, RateQuote> {
        let slots = dispatch_many(&self.fetcher, self.targets(), Stagger::none(), None).await;
        let now = Utc::now();
        let mut rates = IndexMap::new();
        for slot in slots {
            let page = match slot.outcome {
                Ok(page) => page,
                Err(err) => {
                    warn!(pair = %slot.key, error = %err, "converter page unavailable");
                    continue;
                }
            };
            match rate_from_page(&page, &self.selector, now) {
                Some(quote) => {
                    rates.insert(quote.symbol.clone(), quote);
                }
                None => debug!(pair = %slot.key, "no rate on converter page"),
            }
        }
        rates
    }
}

/// First selector match read as `<amount> <FROM> = <rate> <TO>`.
pub(crate) fn rate_from_page(page: &str, selector: &str, now: DateTime<Utc>) -> Option<RateQuote> {
    let selector = parse_selector(selector).ok()?;
    let document = Html::parse_document(page);
    let phrase = document.select(&selector).next()?.text().collect::<Vec<_>>().join(" ");
    let tokens: Vec<&str> = phrase.split_whitespace().collect();
    if tokens.len() < 3 {
        warn!(%phrase, "rate phrase is too short");
        return None;
    }
    let Some(price) = parse_locale_decimal(tokens[tokens.len() - 2]) else {
        warn!(%phrase, "rate phrase has no number before the last currency");
        return None;
    };
    if price.is_sign_negative() {
        warn!(%phrase, %price, "skipping negative rate");
        return None;
    }
    let symbol = format!("{}/{}", tokens[1], tokens[tokens.len() - 1]);
    Some(RateQuote { display_name: symbol.clone(), symbol, price, observed_at: now })
}

impl Source for XeRates {
    fn source_name(&self) -> &'static str {
        "XE"
    }

    fn source_url(&self) -> &'static str {
        "https://www.xe.com/currencyconverter/"
    }
}

#[async_trait::async_trait]
impl RateSource for XeRates {
    /// Keys come from the page phrase (`FROM/TO`), so pair `USD/RUB` is reported as `RUB/USD`.
    async fn get_rates(&self) -> IndexMap<String, RateQuote> {
        self.rates().instrument(self.span.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use rust_decimal::Decimal;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn conn() -> Connection {
        Connection::new(&HttpSettings::default()).unwrap()
    }

    fn page(phrase: &str) -> String {
        format!("<html><body><div class=\"result\"><p>{phrase}</p><p>ignored</p></div></body></html>")
    }

    #[test]
    fn pairs_must_be_permutations_of_currencies() {
        let err = XeRates::new(&conn(), "", XE_CURRENCIES, "USD/RUB, EUR/RUB, USD/USD").err().unwrap();
        match err {
            ConfigError::UnsupportedPairs(pairs) => assert_eq!(pairs, vec!["EUR/RUB", "USD/USD"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(XeRates::new(&conn(), "", XE_CURRENCIES, "XBT/USD, CNY/RUB").is_ok());
    }

    #[test]
    fn twelve_pairs_from_four_currencies() {
        let currencies = TargetSet::new("currencies", XE_CURRENCIES).unwrap();
        let pairs = supported_pairs(&currencies);
        assert_eq!(pairs.len(), 12);
        assert!(pairs.contains(&"RUB/XBT".to_string()));
    }

    #[test]
    fn invalid_selector_is_a_config_error() {
        let reader = XeRates::new(&conn(), "", XE_CURRENCIES, "USD/RUB").unwrap();
        assert!(matches!(reader.with_selector("div[["), Err(ConfigError::InvalidSelector { .. })));
    }

    #[test]
    fn phrase_tokens_give_symbol_and_rate() {
        let quote = rate_from_page(&page("1 RUB = 0.010869 USD"), "div.result > p", Utc::now()).unwrap();
        assert_eq!(quote.symbol, "RUB/USD");
        assert_eq!(quote.price, Decimal::new(10869, 6));

        let quote = rate_from_page(&page("1 XBT = 64,210.55 USD"), "div.result > p", Utc::now()).unwrap();
        assert_eq!(quote.price, Decimal::new(6421055, 2));

        assert!(rate_from_page(&page("1 RUB"), "div.result > p", Utc::now()).is_none());
        assert!(rate_from_page("<html></html>", "div.result > p", Utc::now()).is_none());
    }

    #[test]
    fn negative_rate_is_skipped() {
        assert!(rate_from_page(&page("1 RUB = -0.010869 USD"), "div.result > p", Utc::now()).is_none());
        assert!(rate_from_page(&page("1 RUB = 0 USD"), "div.result > p", Utc::now()).is_some());
    }

    #[tokio::test]
    async fn unmatched_page_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("From", "RUB"))
            .and(query_param("To", "USD"))
            .and(query_param("Amount", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page("1 RUB = 0.010869 USD")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("From", "RUB"))
            .and(query_param("To", "CNY"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>maintenance</body></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("From", "USD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let reader = XeRates::new(&conn(), &server.uri(), XE_CURRENCIES, "USD/RUB, CNY/RUB, RUB/USD")
            .unwrap()
            .with_selector("div.result > p")
            .unwrap();
        let rates = reader.get_rates().await;

        assert_eq!(rates.keys().collect::<Vec<_>>(), vec!["RUB/USD"]);
        assert_eq!(rates["RUB/USD"].price, Decimal::new(10869, 6));
    }

    #[tokio::test]
    async fn keys_follow_the_page_phrase() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("From", "RUB"))
            .and(query_param("To", "USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page("1 RUB = 0.010869 USD")))
            .mount(&server)
            .await;

        let reader = XeRates::new(&conn(), &server.uri(), XE_CURRENCIES, "USD/RUB")
            .unwrap()
            .with_selector("div.result > p")
            .unwrap();
        let rates = reader.get_rates().await;

        assert!(!rates.contains_key("USD/RUB"));
        assert_eq!(rates.keys().collect::<Vec<_>>(), vec!["RUB/USD"]);
    }
}
