use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info_span, warn, Instrument, Span};

use super::bscscan_types::{BscEnvelope, BscReply, TokenTransfer};
use super::{decode_rows, endpoint_url, settle_wallets, Connection, Source, WalletSource};
use crate::config::{ConfigError, TargetSpec, WalletFeedSettings, BSCSCAN_API_URL, BSCSCAN_USDT_CONTRACT};
use crate::fetch::{browser_headers, dispatch_many, Endpoint, JsonFetcher, RequestSpec, Stagger, WALLET_CORRELATION_KEY};
use crate::market_data::normaliser::{orient_transfer, utc_from_secs};
use crate::market_data::types::{
    ItemFailure, ItemResult, TargetSet, TransactionRecord, WalletBalances, WalletTransactions,
};

pub const BSC_USD_SYMBOL: &str = "BSC-USD";
pub const BSC_USD_DECIMALS: u32 = 18;
pub const TRANSFER_PAGE_SIZE: &str = "10";

/// BEP20 balances and recent transfers for a set of BNB Smart Chain wallets.
pub struct BscScanWallets {
    fetcher: JsonFetcher,
    contract: String,
    symbol: String,
    api_key: Option<String>,
    wallets: TargetSet,
    stagger: Stagger,
    span: Span,
}

impl BscScanWallets {
    pub fn new(
        conn: &Connection,
        url: &str,
        contract: &str,
        api_key: Option<&str>,
        wallets: impl Into<TargetSpec>,
    ) -> Result<Self, ConfigError> {
        let wallets = TargetSet::new("wallets", wallets)?;
        let endpoint =
            Endpoint::new(endpoint_url(url, BSCSCAN_API_URL)).with_headers(browser_headers(&conn.user_agent, true)?);
        Ok(Self {
            fetcher: JsonFetcher::new(conn.client.clone(), endpoint),
            contract: endpoint_url(contract, BSCSCAN_USDT_CONTRACT),
            symbol: BSC_USD_SYMBOL.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            wallets,
            stagger: Stagger::between(Duration::from_millis(10), Duration::from_millis(30)),
            span: info_span!("source", name = "BSCSCAN"),
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

    fn request(&self, wallet: &str, action: &str) -> RequestSpec {
        let mut request = RequestSpec::new()
            .param("module", "account")
            .param("action", action)
            .param("contractaddress", self.contract.as_str())
            .param("address", wallet);
        request = match action {
            "tokentx" => request.params([
                ("page", "1"),
                ("offset", TRANSFER_PAGE_SIZE),
                ("startblock", "0"),
                ("endblock", "999999999"),
                ("sort", "desc"),
            ]),
            _ => request.param("tag", "latest"),
        };
        if let Some(key) = &self.api_key {
            request = request.param("apikey", key.as_str());
        }
        request
    }

    fn targets(&self, action: &str) -> IndexMap<String, RequestSpec> {
        self.wallets.iter().map(|wallet| (wallet.to_string(), self.request(wallet, action))).collect()
    }

    async fn balances(&self) -> WalletBalances {
        let slots =
            dispatch_many(&self.fetcher, self.targets("tokenbalance"), self.stagger, Some(WALLET_CORRELATION_KEY)).await;
        WalletBalances(settle_wallets("BSCSCAN", slots, |_, payload| parse_balance(payload)))
    }

    async fn transactions(&self) -> WalletTransactions {
        let slots =
            dispatch_many(&self.fetcher, self.targets("tokentx"), self.stagger, Some(WALLET_CORRELATION_KEY)).await;
        WalletTransactions(settle_wallets("BSCSCAN", slots, |wallet, payload| self.parse_transfers(wallet, payload)))
    }

    pub(crate) fn parse_transfers(&self, wallet: &str, payload: Value) -> ItemResult<Vec<TransactionRecord>> {
        let envelope: BscEnvelope = serde_json::from_value(payload)?;
        let result = match BscReply::from(envelope) {
            BscReply::Ok(result) => result,
            BscReply::Empty => return Ok(Vec::new()),
            BscReply::NotOk(msg) => return Err(ItemFailure::Provider(msg)),
        };
        let rows: Vec<Value> = serde_json::from_value(result)?;
        let records = decode_rows::<TokenTransfer>("bep20 transfers", rows)
            .into_iter()
            .filter(|t| t.token_symbol == self.symbol && t.contract_address.eq_ignore_ascii_case(&self.contract))
            .filter_map(|t| {
                let timestamp = t.time_stamp.parse::<i64>().ok().and_then(utc_from_secs);
                let (Ok(value), Some(timestamp)) = (t.value.parse::<i128>(), timestamp) else {
                    warn!(wallet, value = %t.value, time_stamp = %t.time_stamp, "skipping unreadable transfer");
                    return None;
                };
                let (counterparty_address, amount) =
                    orient_transfer(wallet, &t.from, &t.to, value, |a, b| a.eq_ignore_ascii_case(b));
                Some(TransactionRecord { counterparty_address, timestamp, amount })
            })
            .collect();
        Ok(records)
    }
}

pub(crate) fn parse_balance(payload: Value) -> ItemResult<i128> {
    let envelope: BscEnvelope = serde_json::from_value(payload)?;
    match BscReply::from(envelope) {
        BscReply::Ok(Value::String(raw)) => {
            raw.trim().parse::<i128>().map_err(|err| ItemFailure::Schema(format!("balance `{raw}`: {err}")))
        }
        BscReply::Ok(other) => Err(ItemFailure::Schema(format!("balance result is not a string: {other}"))),
        BscReply::Empty => Ok(0),
        BscReply::NotOk(msg) => Err(ItemFailure::Provider(msg)),
    }
}

impl Source for BscScanWallets {
    fn source_name(&self) -> &'static str {
        "BSCSCAN"
    }

    fn source_url(&self) -> &'static str {
        "https://bscscan.com/"
    }
}

#[async_trait::async_trait]
impl WalletSource for BscScanWallets {
    fn decimals(&self) -> u32 {
        BSC_USD_DECIMALS
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
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const A: &str = "0xE5855278Ecf07e423BAecE3168fAD755B117E261";
    const B: &str = "0x8894e0a0c962cb723c1976a4421c95949be2d4e3";

    fn reader(uri: &str, wallets: Vec<&str>) -> BscScanWallets {
        let conn = Connection::new(&HttpSettings::default()).unwrap();
        BscScanWallets::new(&conn, uri, BSCSCAN_USDT_CONTRACT, Some("KEY"), wallets)
            .unwrap()
            .with_stagger(Stagger::none())
    }

    fn transfer(from: &str, to: &str, value: &str, symbol: &str) -> Value {
        json!({
            "blockNumber": "34000000",
            "timeStamp": "1700000000",
            "hash": "0xabc",
            "from": from,
            "to": to,
            "value": value,
            "contractAddress": BSCSCAN_USDT_CONTRACT,
            "tokenName": "Binance-Peg BSC-USD",
            "tokenSymbol": symbol,
            "tokenDecimal": "18"
        })
    }

    #[tokio::test]
    async fn balances_mark_failures_in_band() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("action", "tokenbalance"))
            .and(query_param("address", A))
            .and(query_param("apikey", "KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1", "message": "OK", "result": "12000000000000000000"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("address", B))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Invalid API Key"
            })))
            .mount(&server)
            .await;

        let balances = reader(&server.uri(), vec![A, B]).get_balances().await;

        assert_eq!(*balances.get(A).unwrap().as_ref().unwrap(), 12_000_000_000_000_000_000);
        assert!(matches!(balances.get(B), Some(Err(ItemFailure::Provider(msg))) if msg == "NOTOK: Invalid API Key"));
        assert_eq!(balances.sentinel_view().values().copied().collect::<Vec<_>>(), vec![12_000_000_000_000_000_000, -1]);
    }

    #[tokio::test]
    async fn transfers_invert_for_sender() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("action", "tokentx"))
            .and(query_param("address", A))
            .and(query_param("offset", TRANSFER_PAGE_SIZE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [
                    transfer(&A.to_lowercase(), B, "100", "BSC-USD"),
                    transfer(B, &A.to_lowercase(), "40", "BSC-USD"),
                    transfer(B, &A.to_lowercase(), "999", "CAKE")
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "tokentx"))
            .and(query_param("address", B))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "No transactions found", "result": []
            })))
            .mount(&server)
            .await;

        let txs = reader(&server.uri(), vec![A, B]).get_transactions().await;

        let a = txs.get(A).unwrap().as_ref().unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!((a[0].counterparty_address.as_str(), a[0].amount), (B, -100));
        assert_eq!((a[1].counterparty_address.as_str(), a[1].amount), (B, 40));
        assert!(txs.get(B).unwrap().as_ref().unwrap().is_empty());
    }

    #[test]
    fn one_bad_transfer_keeps_the_rest() {
        let r = reader("http://unused", vec![A]);
        let mut bad_time = transfer(B, A, "7", "BSC-USD");
        bad_time["timeStamp"] = json!("soon");
        let records = r
            .parse_transfers(
                A,
                json!({
                    "status": "1",
                    "message": "OK",
                    "result": [
                        transfer(B, A, "40", "BSC-USD"),
                        bad_time,
                        transfer(B, A, "1e18", "BSC-USD"),
                        {"hash": "0xdef", "value": 5},
                        transfer(A, B, "100", "BSC-USD")
                    ]
                }),
            )
            .unwrap();
        let amounts: Vec<_> = records.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![40, -100]);
    }

    #[test]
    fn non_string_balance_is_a_schema_error() {
        let err = parse_balance(json!({"status": "1", "message": "OK", "result": 5})).unwrap_err();
        assert!(matches!(err, ItemFailure::Schema(_)));
    }
}
