use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info_span, warn, Instrument, Span};

use super::tron_types::{AccountData, TronEnvelope, TronReply, Trc20Transfer};
use super::{decode_rows, endpoint_url, settle_wallets, Connection, Source, WalletSource};
use crate::config::{ConfigError, TargetSpec, WalletFeedSettings, TRON_API_URL, TRON_USDT_CONTRACT};
use crate::fetch::{
    browser_headers, dispatch_many, with_api_key, Endpoint, JsonFetcher, RequestSpec, Stagger, WALLET_CORRELATION_KEY,
};
use crate::market_data::normaliser::{orient_transfer, utc_from_millis};
use crate::market_data::types::{
    ItemFailure, ItemResult, TargetSet, TransactionRecord, WalletBalances, WalletTransactions,
};

pub const TRON_API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
pub const TRON_USDT_SYMBOL: &str = "USDT";
pub const TRON_USDT_DECIMALS: u32 = 6;

/// TRC20 balances and recent transfers for a set of Tron wallets.
pub struct TronWallets {
    fetcher: JsonFetcher,
    base_url: String,
    contract: String,
    symbol: String,
    wallets: TargetSet,
    stagger: Stagger,
    span: Span,
}

impl TronWallets {
    pub fn new(
        conn: &Connection,
        url: &str,
        contract: &str,
        api_key: Option<&str>,
        wallets: impl Into<TargetSpec>,
    ) -> Result<Self, ConfigError> {
        let wallets = TargetSet::new("wallets", wallets)?;
        let mut headers = browser_headers(&conn.user_agent, true)?;
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            headers = with_api_key(headers, TRON_API_KEY_HEADER, key)?;
        }
        let contract = endpoint_url(contract, TRON_USDT_CONTRACT);
        Ok(Self {
            fetcher: JsonFetcher::new(conn.client.clone(), Endpoint::unbound().with_headers(headers)),
            base_url: endpoint_url(url, TRON_API_URL),
            contract,
            symbol: TRON_USDT_SYMBOL.to_string(),
            wallets,
            stagger: Stagger::between(Duration::from_millis(70), Duration::from_millis(90)),
            span: info_span!("source", name = "TRONGRID"),
        })
    }

    pub fn from_settings(conn: &Connection, settings: &WalletFeedSettings) -> Result<Self, ConfigError> {
        Self::new(conn, &settings.url, &settings.contract, settings.api_key.as_deref(), settings.wallets.clone())
    }

    pub fn with_stagger(mut self, stagger: Stagger) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn wallets(&self) -> &TargetSet {
        &self.wallets
    }

    fn account_url(&self, wallet: &str) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, wallet)
        } else {
            format!("{}/{}", self.base_url, wallet)
        }
    }

    fn targets(&self, suffix: &str) -> IndexMap<String, RequestSpec> {
        self.wallets
            .iter()
            .map(|wallet| (wallet.to_string(), RequestSpec::to(format!("{}{}", self.account_url(wallet), suffix))))
            .collect()
    }

    async fn balances(&self) -> WalletBalances {
        let slots = dispatch_many(&self.fetcher, self.targets(""), self.stagger, Some(WALLET_CORRELATION_KEY)).await;
        WalletBalances(settle_wallets("TRONGRID", slots, |_, payload| self.parse_balance(payload)))
    }

    async fn transactions(&self) -> WalletTransactions {
        let slots = dispatch_many(
            &self.fetcher,
            self.targets("/transactions/trc20"),
            self.stagger,
            Some(WALLET_CORRELATION_KEY),
        )
        .await;
        WalletTransactions(settle_wallets("TRONGRID", slots, |wallet, payload| self.parse_transfers(wallet, payload)))
    }

    pub(crate) fn parse_balance(&self, payload: Value) -> ItemResult<i128> {
        let envelope: TronEnvelope<AccountData> = serde_json::from_value(payload)?;
        let accounts = match TronReply::from(envelope) {
            TronReply::Success(accounts) => accounts,
            TronReply::Failure(msg) => return Err(ItemFailure::Provider(msg)),
        };
        let Some(account) = accounts.iter().find(|account| !account.trc20.is_empty()) else {
            return Ok(0);
        };
        match account.trc20.iter().find_map(|entry| entry.get(&self.contract)) {
            Some(raw) => raw
                .trim()
                .parse::<i128>()
                .map_err(|err| ItemFailure::Schema(format!("balance `{raw}`: {err}"))),
            None => Ok(0),
        }
    }

    pub(crate) fn parse_transfers(&self, wallet: &str, payload: Value) -> ItemResult<Vec<TransactionRecord>> {
        let envelope: TronEnvelope<Value> = serde_json::from_value(payload)?;
        let rows = match TronReply::from(envelope) {
            TronReply::Success(rows) => rows,
            TronReply::Failure(msg) => return Err(ItemFailure::Provider(msg)),
        };
        let records = decode_rows::<Trc20Transfer>("trc20 transfers", rows)
            .into_iter()
            .filter(|t| t.token_info.address == self.contract && t.token_info.symbol.to_uppercase() == self.symbol)
            .filter_map(|t| {
                let (Ok(value), Some(timestamp)) = (t.value.parse::<i128>(), utc_from_millis(t.block_timestamp)) else {
                    warn!(wallet, value = %t.value, block_timestamp = t.block_timestamp, "skipping unreadable transfer");
                    return None;
                };
                let (counterparty_address, amount) = orient_transfer(wallet, &t.from, &t.to, value, |a, b| a == b);
                Some(TransactionRecord { counterparty_address, timestamp, amount })
            })
            .collect();
        Ok(records)
    }
}

impl Source for TronWallets {
    fn source_name(&self) -> &'static str {
        "TRONGRID"
    }

    fn source_url(&self) -> &'static str {
        "https://www.trongrid.io/"
    }
}

#[async_trait::async_trait]
impl WalletSource for TronWallets {
    fn decimals(&self) -> u32 {
        TRON_USDT_DECIMALS
    }

    async fn get_balances(&self) -> WalletBalances {
        self.balances().instrument(self.span.clone()).await
    }

    async fn get_transactions(&self) -> WalletTransactions {
        self.transactions().instrument(self.span.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const A: &str = "TZGRrMPEQMXyZndV1BaRy4SuCd3aTuKGBi";
    const B: &str = "TEnGt4WMjmVDmfDm9EC6xQXPWtMpuetobC";

    fn reader(uri: &str, wallets: Vec<&str>) -> TronWallets {
        let conn = Connection::new(&HttpSettings::default()).unwrap();
        TronWallets::new(&conn, &format!("{uri}/v1/accounts/"), TRON_USDT_CONTRACT, Some("test-key"), wallets)
            .unwrap()
            .with_stagger(Stagger::none())
    }

    fn transfer(from: &str, to: &str, value: &str, contract: &str, symbol: &str) -> Value {
        json!({
            "transaction_id": "abc",
            "token_info": {"symbol": symbol, "address": contract, "decimals": 6, "name": "Tether USD"},
            "block_timestamp": 1_700_000_000_000i64,
            "from": from,
            "to": to,
            "type": "Transfer",
            "value": value
        })
    }

    #[tokio::test]
    async fn balances_cover_every_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{A}")))
            .and(header(TRON_API_KEY_HEADER, "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "success": true,
                        "data": [{"balance": 10, "trc20": [{"TXYZ": "5"}, {TRON_USDT_CONTRACT: "1500000"}]}]
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{B}")))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false, "error": "account not found", "statusCode": 400
            })))
            .mount(&server)
            .await;

        let balances = reader(&server.uri(), vec![A, B]).get_balances().await;

        assert_eq!(balances.len(), 2);
        assert_eq!(*balances.get(A).unwrap().as_ref().unwrap(), 1_500_000);
        assert!(matches!(balances.get(B), Some(Err(ItemFailure::Provider(msg))) if msg == "account not found"));
        assert_eq!(balances.sentinel_view()[B], -1);
        assert_eq!(balances.successful_total(), (1_500_000, 1));
    }

    #[test]
    fn account_without_tracked_contract_has_zero_balance() {
        let r = reader("http://unused", vec![A]);
        assert_eq!(r.parse_balance(json!({"success": true, "data": []})).unwrap(), 0);
        assert_eq!(r.parse_balance(json!({"success": true, "data": [{"trc20": [{"TXYZ": "5"}]}]})).unwrap(), 0);
        assert!(matches!(r.parse_balance(json!({"data": []})), Err(ItemFailure::Schema(_))));
    }

    #[tokio::test]
    async fn transfers_are_filtered_and_oriented() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{A}/transactions/trc20")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [
                    transfer(A, B, "100", TRON_USDT_CONTRACT, "USDT"),
                    transfer(B, A, "250", TRON_USDT_CONTRACT, "usdt"),
                    transfer(B, A, "999", "TFakeContract", "USDT"),
                    transfer(B, A, "999", TRON_USDT_CONTRACT, "USDD")
                ],
                "meta": {"page_size": 4}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{B}/transactions/trc20")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [transfer(A, B, "100", TRON_USDT_CONTRACT, "USDT")]
            })))
            .mount(&server)
            .await;

        let txs = reader(&server.uri(), vec![A, B]).get_transactions().await;

        let a = txs.get(A).unwrap().as_ref().unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!((a[0].counterparty_address.as_str(), a[0].amount), (B, -100));
        assert_eq!((a[1].counterparty_address.as_str(), a[1].amount), (B, 250));
        assert_eq!(a[0].timestamp.timestamp(), 1_700_000_000);

        let b = txs.get(B).unwrap().as_ref().unwrap();
        assert_eq!((b[0].counterparty_address.as_str(), b[0].amount), (A, 100));
    }

    #[test]
    fn one_bad_transfer_keeps_the_rest() {
        let r = reader("http://unused", vec![A]);
        let mut no_timestamp = transfer(B, A, "7", TRON_USDT_CONTRACT, "USDT");
        no_timestamp["block_timestamp"] = json!("yesterday");
        let records = r
            .parse_transfers(
                A,
                json!({
                    "success": true,
                    "data": [
                        transfer(A, B, "100", TRON_USDT_CONTRACT, "USDT"),
                        no_timestamp,
                        transfer(B, A, "12.5", TRON_USDT_CONTRACT, "USDT"),
                        {"transaction_id": "def", "token_info": null},
                        transfer(B, A, "250", TRON_USDT_CONTRACT, "USDT")
                    ]
                }),
            )
            .unwrap();
        let amounts: Vec<_> = records.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![-100, 250]);
    }

    #[tokio::test]
    async fn failed_wallet_keeps_an_empty_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "error": "rate limited"})))
            .mount(&server)
            .await;

        let txs = reader(&server.uri(), vec![A]).get_transactions().await;
        assert!(txs.get(A).unwrap().is_err());
        assert!(txs.lossy_view()[A].is_empty());
    }
}
