use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};

use crate::config::ConfigError;

/// Field name injected into wallet payloads to tie them back to their request.
pub const WALLET_CORRELATION_KEY: &str = "wallet_address";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request target can not be empty")]
    MissingTarget,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("correlation key `{0}` already exists in payload")]
    CorrelationCollision(String),
    #[error("payload is not an object, can not attach correlation key `{0}`")]
    NotAnObject(String),
    #[error("response belongs to `{found}`, expected `{expected}`")]
    Misattributed { expected: String, found: String },
    #[error("batch task failed: {0}")]
    Task(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Field injected into a structured payload after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub key: String,
    pub value: Option<String>,
}

/// Call-site request parameters. Anything left unset falls back to the fetcher's [`Endpoint`].
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub target: Option<String>,
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub delay: Duration,
    pub correlation: Option<Correlation>,
}

impl RequestSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(target: impl Into<String>) -> Self {
        Self { target: Some(target.into()), ..Self::default() }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params.extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn correlate(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.correlation = Some(Correlation { key: key.into(), value });
        self
    }
}

/// Immutable per-fetcher defaults: target, query and headers.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub url: Option<String>,
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), ..Self::default() }
    }

    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params = params.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Final URL and status of the most recent response a fetcher saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub url: String,
    pub status: u16,
}

/// Header set every provider gets: a browser user agent, plus JSON content negotiation for APIs.
pub fn browser_headers(user_agent: &str, json: bool) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|_| ConfigError::InvalidHeader(USER_AGENT.to_string()))?,
    );
    if json {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}

/// Attach a static credential header.
pub fn with_api_key(mut headers: HeaderMap, name: &str, key: &str) -> Result<HeaderMap, ConfigError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| ConfigError::InvalidHeader(name.to_string()))?;
    let value = HeaderValue::from_str(key).map_err(|_| ConfigError::InvalidHeader(name.to_string()))?;
    headers.insert(name, value);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_headers_include_content_negotiation() {
        let headers = browser_headers("test-agent", true).unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "test-agent");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn html_headers_only_carry_user_agent() {
        let headers = browser_headers("test-agent", false).unwrap();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn api_key_header_is_attached() {
        let headers = with_api_key(HeaderMap::new(), "TRON-PRO-API-KEY", "secret").unwrap();
        assert_eq!(headers.get("tron-pro-api-key").unwrap(), "secret");
    }

    #[test]
    fn invalid_header_value_is_a_config_error() {
        let err = browser_headers("bad\nagent", false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader(_)));
    }

    #[test]
    fn request_builder_collects_params() {
        let spec = RequestSpec::to("http://x")
            .param("module", "account")
            .params([("tag", "latest")])
            .correlate(WALLET_CORRELATION_KEY, Some("0xabc".into()));
        assert_eq!(spec.params.len(), 2);
        assert_eq!(spec.correlation.unwrap().value.as_deref(), Some("0xabc"));
    }
}
