// Source: https://query2.finance.yahoo.com/v7/finance/quote?symbols=...
use serde::Deserialize;
use serde_json::Value;

use crate::market_data::normaliser::WireDecimal;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum QuoteReply {
    Quotes {
        #[serde(rename = "quoteResponse")]
        quote_response: QuoteResponse,
    },
    Failure { finance: FinanceError },
}

#[derive(Debug, Deserialize)]
pub struct QuoteResponse {
    // decoded row by row into `QuoteRow`
    #[serde(default)]
    pub result: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteRow {
    pub symbol: Option<String>,
    #[serde(rename = "shortName")]
    pub short_name: Option<String>,
    #[serde(rename = "regularMarketPrice")]
    pub regular_market_price: Option<WireDecimal>,
    // we ignore the other fields
}

#[derive(Debug, Deserialize)]
pub struct FinanceError {
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub description: Option<String>,
}
