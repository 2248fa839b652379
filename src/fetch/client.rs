use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::types::{Correlation, Endpoint, FetchError, FetchResult, RequestSpec, ResponseMeta};
use super::Fetch;
use crate::config::{ConfigError, HttpSettings};

const BODY_LOG_LIMIT: usize = 512;

pub fn build_http_client(settings: &HttpSettings) -> Result<Client, ConfigError> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .tcp_keepalive(Some(Duration::from_secs(30)));

    if let Some(timeout) = settings.request_timeout() {
        builder = builder.timeout(timeout);
    }
    if let Some(timeout) = settings.connect_timeout() {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(max_idle) = settings.max_idle_per_host {
        builder = builder.pool_max_idle_per_host(max_idle);
    }

    Ok(builder.build()?)
}

// Shared by both fetcher variants: pooled client, defaults, last response.
#[derive(Clone)]
struct Session {
    client: Client,
    endpoint: Arc<Endpoint>,
    last: Arc<Mutex<Option<ResponseMeta>>>,
}

impl Session {
    fn new(client: Client, endpoint: Endpoint) -> Self {
        Self { client, endpoint: Arc::new(endpoint), last: Arc::new(Mutex::new(None)) }
    }

    async fn send(&self, request: &RequestSpec) -> FetchResult<(ResponseMeta, String)> {
        let url = request
            .target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.endpoint.url.as_deref().filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| {
                error!("request target can not be empty");
                FetchError::MissingTarget
            })?;

        if !request.delay.is_zero() {
            tokio::time::sleep(request.delay).await;
        }

        let params = if request.params.is_empty() { &self.endpoint.params } else { &request.params };
        let mut headers = self.endpoint.headers.clone();
        headers.extend(request.headers.clone());

        debug!(url, delay_ms = request.delay.as_millis() as u64, "sending request");
        let response = self
            .client
            .get(url)
            .query(params)
            .headers(headers)
            .send()
            .await
            .map_err(|err| {
                error!(url, error = %err, "error while fetching url");
                FetchError::Transport(err)
            })?;

        let meta = ResponseMeta { url: response.url().to_string(), status: response.status().as_u16() };
        *self.last.lock() = Some(meta.clone());

        let body = response.text().await.map_err(|err| {
            error!(url = %meta.url, status = meta.status, error = %err, "error while reading response body");
            FetchError::Transport(err)
        })?;
        Ok((meta, body))
    }

    fn last_response(&self) -> Option<ResponseMeta> {
        self.last.lock().clone()
    }
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(BODY_LOG_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn record_outcome<T>(mode: &'static str, result: &FetchResult<T>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("ratesreader_requests_total", "mode" => mode, "outcome" => outcome).increment(1);
}

/// Inject `correlation.key -> correlation.value` into a decoded object payload.
pub fn attach_correlation(payload: &mut Value, correlation: &Correlation) -> FetchResult<()> {
    let Value::Object(map) = payload else {
        return Err(FetchError::NotAnObject(correlation.key.clone()));
    };
    if map.contains_key(&correlation.key) {
        return Err(FetchError::CorrelationCollision(correlation.key.clone()));
    }
    if correlation.value.is_none() {
        warn!(key = %correlation.key, "correlation value is not set for key");
    }
    let value = correlation.value.clone().map(Value::String).unwrap_or(Value::Null);
    map.insert(correlation.key.clone(), value);
    Ok(())
}

/// Structured mode: decodes the body as JSON, whatever the status code.
#[derive(Clone)]
pub struct JsonFetcher {
    session: Session,
}

impl JsonFetcher {
    pub fn new(client: Client, endpoint: Endpoint) -> Self {
        Self { session: Session::new(client, endpoint) }
    }

    async fn fetch_json(&self, request: &RequestSpec) -> FetchResult<Value> {
        let (meta, body) = self.session.send(request).await?;
        let mut payload: Value = serde_json::from_str(&body).map_err(|err| {
            error!(url = %meta.url, status = meta.status, error = %err, body = %snippet(&body), "failed to decode json response");
            FetchError::Decode(err)
        })?;
        if let Some(correlation) = &request.correlation {
            attach_correlation(&mut payload, correlation).map_err(|err| {
                error!(url = %meta.url, error = %err, body = %snippet(&body), "failed to correlate response");
                err
            })?;
        }
        Ok(payload)
    }
}

#[async_trait::async_trait]
impl Fetch for JsonFetcher {
    type Output = Value;

    async fn fetch(&self, request: RequestSpec) -> FetchResult<Value> {
        let result = self.fetch_json(&request).await;
        record_outcome("json", &result);
        result
    }

    fn last_response(&self) -> Option<ResponseMeta> {
        self.session.last_response()
    }
}

/// Text mode: returns the raw body; a non-success status is a failure.
#[derive(Clone)]
pub struct TextFetcher {
    session: Session,
}

impl TextFetcher {
    pub fn new(client: Client, endpoint: Endpoint) -> Self {
        Self { session: Session::new(client, endpoint) }
    }

    async fn fetch_text(&self, request: &RequestSpec) -> FetchResult<String> {
        if request.correlation.is_some() {
            debug!("correlation is ignored for text responses");
        }
        let (meta, body) = self.session.send(request).await?;
        if !(200..300).contains(&meta.status) {
            error!(url = %meta.url, status = meta.status, body = %snippet(&body), "unexpected response status");
            return Err(FetchError::Status { status: meta.status, url: meta.url });
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl Fetch for TextFetcher {
    type Output = String;

    async fn fetch(&self, request: RequestSpec) -> FetchResult<String> {
        let result = self.fetch_text(&request).await;
        record_outcome("text", &result);
        result
    }

    fn last_response(&self) -> Option<ResponseMeta> {
        self.session.last_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::types::WALLET_CORRELATION_KEY;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        build_http_client(&HttpSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn json_fetch_uses_endpoint_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbols", "USDRUB=X"))
            .and(header("x-test", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-test", "1".parse().unwrap());
        let endpoint = Endpoint::new(format!("{}/quote", server.uri()))
            .with_params([("symbols", "USDRUB=X")])
            .with_headers(headers);
        let fetcher = JsonFetcher::new(client(), endpoint);

        let payload = fetcher.fetch(RequestSpec::new()).await.unwrap();
        assert_eq!(payload, json!({"ok": true}));

        let meta = fetcher.last_response().unwrap();
        assert_eq!(meta.status, 200);
        assert!(meta.url.contains("symbols=USDRUB%3DX"));
    }

    #[tokio::test]
    async fn correlation_value_is_injected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(client(), Endpoint::new(server.uri()));
        let payload = fetcher
            .fetch(RequestSpec::new().correlate(WALLET_CORRELATION_KEY, Some("TAddr".into())))
            .await
            .unwrap();
        assert_eq!(payload[WALLET_CORRELATION_KEY], "TAddr");
    }

    #[tokio::test]
    async fn correlation_without_value_injects_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(client(), Endpoint::new(server.uri()));
        let payload = fetcher.fetch(RequestSpec::new().correlate("tag", None)).await.unwrap();
        assert_eq!(payload["tag"], Value::Null);
    }

    #[tokio::test]
    async fn correlation_collision_fails_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"wallet_address": "other"})))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(client(), Endpoint::new(server.uri()));
        let err = fetcher
            .fetch(RequestSpec::new().correlate(WALLET_CORRELATION_KEY, Some("TAddr".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::CorrelationCollision(key) if key == WALLET_CORRELATION_KEY));
    }

    #[tokio::test]
    async fn missing_target_fails_before_io() {
        let fetcher = JsonFetcher::new(client(), Endpoint::unbound());
        let err = fetcher.fetch(RequestSpec::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingTarget));
        assert!(fetcher.last_response().is_none());

        let err = fetcher.fetch(RequestSpec::to("  ")).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingTarget));
    }

    #[tokio::test]
    async fn html_body_in_json_mode_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>busy</html>"))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(client(), Endpoint::new(server.uri()));
        let err = fetcher.fetch(RequestSpec::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        assert_eq!(fetcher.last_response().unwrap().status, 503);
    }

    #[tokio::test]
    async fn json_mode_decodes_error_envelopes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"success": false, "error": "bad address"})))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(client(), Endpoint::new(server.uri()));
        let payload = fetcher.fetch(RequestSpec::new()).await.unwrap();
        assert_eq!(payload["error"], "bad address");
    }

    #[tokio::test]
    async fn call_site_target_overrides_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hi</p>"))
            .mount(&server)
            .await;

        let fetcher = TextFetcher::new(client(), Endpoint::new("http://127.0.0.1:9/unused"));
        let body = fetcher.fetch(RequestSpec::to(format!("{}/page", server.uri()))).await.unwrap();
        assert_eq!(body, "<p>hi</p>");
    }

    #[tokio::test]
    async fn text_mode_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let fetcher = TextFetcher::new(client(), Endpoint::new(server.uri()));
        let err = fetcher.fetch(RequestSpec::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn delay_is_applied_before_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let fetcher = JsonFetcher::new(client(), Endpoint::new(server.uri()));
        let started = Instant::now();
        fetcher.fetch(RequestSpec::new().delay(Duration::from_millis(50))).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn non_object_payload_can_not_be_correlated() {
        let mut payload = json!([1, 2, 3]);
        let correlation = Correlation { key: "k".into(), value: Some("v".into()) };
        assert!(matches!(attach_correlation(&mut payload, &correlation), Err(FetchError::NotAnObject(_))));
    }
}
