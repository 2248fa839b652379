// Source: https://api.trongrid.io/v1/accounts/{address} and .../transactions/trc20
use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TronEnvelope<T> {
    pub success: bool,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum TronReply<T> {
    Success(Vec<T>),
    Failure(String),
}

impl<T> From<TronEnvelope<T>> for TronReply<T> {
    fn from(envelope: TronEnvelope<T>) -> Self {
        if envelope.success {
            TronReply::Success(envelope.data)
        } else {
            TronReply::Failure(envelope.error.unwrap_or_else(|| "Unknown error".to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountData {
    // [{ "<contract address>": "<raw amount>" }, ...]
    #[serde(default)]
    pub trc20: Vec<HashMap<String, String>>,
    // we ignore the other fields
}

#[derive(Debug, Deserialize)]
pub struct Trc20Transfer {
    pub token_info: TokenInfo,
    pub block_timestamp: i64,
    pub from: String,
    pub to: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: String,
    #[serde(default)]
    pub decimals: Option<u32>,
}
