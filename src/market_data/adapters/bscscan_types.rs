// Source: https://api.bscscan.com/api?module=account&action=tokenbalance|tokentx
use serde::Deserialize;
use serde_json::Value;

pub const NO_TRANSACTIONS: &str = "No transactions found";

#[derive(Debug, Deserialize)]
pub struct BscEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    pub message: String,
    pub result: Value,
}

#[derive(Debug)]
pub enum BscReply {
    Ok(Value),
    Empty,
    NotOk(String),
}

impl From<BscEnvelope> for BscReply {
    fn from(envelope: BscEnvelope) -> Self {
        if envelope.message.trim().eq_ignore_ascii_case("OK") {
            BscReply::Ok(envelope.result)
        } else if envelope.message.trim() == NO_TRANSACTIONS {
            BscReply::Empty
        } else {
            match envelope.result.as_str() {
                Some(detail) if !detail.is_empty() => BscReply::NotOk(format!("{}: {}", envelope.message, detail)),
                _ => BscReply::NotOk(envelope.message),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub time_stamp: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub contract_address: String,
    pub token_symbol: String,
    // we ignore the other fields
}
