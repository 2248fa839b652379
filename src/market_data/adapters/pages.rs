use indexmap::IndexMap;
use scraper::Html;
use tracing::{info_span, warn, Instrument, Span};

use super::xe::parse_selector;
use super::Connection;
use crate::config::{ConfigError, PageSettings};
use crate::fetch::{browser_headers, dispatch_many, Endpoint, RequestSpec, Stagger, TextFetcher};
use crate::market_data::types::{ItemFailure, ItemResult};

/// Arbitrary pages, each read through its own CSS selector.
pub struct PageScraper {
    fetcher: TextFetcher,
    pages: IndexMap<String, String>,
    stagger: Stagger,
    span: Span,
}

impl PageScraper {
    /// Selectors are checked here; a later duplicate url replaces the earlier selector.
    pub fn new<I, U, S>(conn: &Connection, pages: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (U, S)>,
        U: Into<String>,
        S: Into<String>,
    {
        let mut checked = IndexMap::new();
        for (url, selector) in pages {
            let (url, selector) = (url.into().trim().to_string(), selector.into());
            if url.is_empty() {
                return Err(ConfigError::EmptyTarget);
            }
            parse_selector(&selector)?;
            checked.insert(url, selector);
        }
        if checked.is_empty() {
            return Err(ConfigError::EmptyTargetSet("pages"));
        }
        Ok(Self {
            fetcher: TextFetcher::new(
                conn.client.clone(),
                Endpoint::unbound().with_headers(browser_headers(&conn.user_agent, false)?),
            ),
            pages: checked,
            stagger: Stagger::none(),
            span: info_span!("source", name = "PAGES"),
        })
    }

    pub fn from_settings(conn: &Connection, pages: &[PageSettings]) -> Result<Self, ConfigError> {
        Self::new(conn, pages.iter().map(|p| (p.url.clone(), p.selector.clone())))
    }

    pub fn with_stagger(mut self, stagger: Stagger) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    /// Trimmed text of the first match per url, in configured order.
    pub async fn get_pages(&self) -> IndexMap<String, ItemResult<String>> {
        self.scrape().instrument(self.span.clone()).await
    }

    async fn scrape(&self) -> IndexMap<String, ItemResult<String>> {
        let targets = self.pages.keys().map(|url| (url.clone(), RequestSpec::to(url.as_str()))).collect();
        let slots = dispatch_many(&self.fetcher, targets, self.stagger, None).await;
        slots
            .into_iter()
            .map(|slot| {
                let selector = self.pages.get(&slot.key).map(String::as_str).unwrap_or_default();
                let result = slot.outcome.map_err(ItemFailure::from).and_then(|page| first_match(&page, selector));
                if let Err(err) = &result {
                    warn!(url = %slot.key, error = %err, "page scrape failed");
                }
                (slot.key, result)
            })
            .collect()
    }
}

pub(crate) fn first_match(page: &str, selector: &str) -> ItemResult<String> {
    let parsed = parse_selector(selector).map_err(|err| ItemFailure::Schema(err.to_string()))?;
    let document = Html::parse_document(page);
    let element = document
        .select(&parsed)
        .next()
        .ok_or_else(|| ItemFailure::Schema(format!("no element matches `{selector}`")))?;
    Ok(element.text().collect::<String>().trim().to_string())
}
