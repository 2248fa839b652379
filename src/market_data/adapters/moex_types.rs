// Source: https://iss.moex.com/iss/engines/currency/markets/selt/boards/CETS/securities.json
// Rows are positional; the column order is pinned by the request params.
use serde::Deserialize;
use serde_json::Value;

use crate::market_data::normaliser::WireDecimal;

pub const ISS_PARAMS: [(&str, &str); 4] = [
    ("iss.meta", "off"),
    ("iss.only", "securities,marketdata"),
    ("securities.columns", "SECID,SHORTNAME,SECNAME"),
    ("marketdata.columns", "WAPRICE,UPDATETIME,SECID,SYSTIME"),
];

#[derive(Debug, Deserialize)]
pub struct IssReply {
    pub securities: IssTable,
    pub marketdata: IssTable,
}

/// Rows stay raw here and are decoded one at a time.
#[derive(Debug, Deserialize)]
pub struct IssTable {
    #[serde(default)]
    pub data: Vec<Value>,
}

/// `[SECID, SHORTNAME, SECNAME]`
#[derive(Debug, Deserialize)]
pub struct SecurityRow(pub String, pub Option<String>, pub Option<String>);

/// `[WAPRICE, UPDATETIME, SECID, SYSTIME]`
#[derive(Debug, Deserialize)]
pub struct MarketDataRow(
    pub Option<WireDecimal>,
    pub Option<String>,
    pub String,
    pub Option<String>,
);
