// Converts provider wire values (strings, JSON numbers, epoch stamps) into domain values.
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;

const MOSCOW_OFFSET_SECS: i32 = 3 * 3600;

/// A decimal some providers send as a string and others as a bare number.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum WireDecimal {
    Text(String),
    Number(serde_json::Number),
}

impl WireDecimal {
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            WireDecimal::Text(s) => parse_locale_decimal(s),
            WireDecimal::Number(n) => decimal_from_number(n),
        }
    }
}

/// Parse a decimal written with `,` thousands separators, e.g. `"1,234.56"`.
pub fn parse_locale_decimal(s: &str) -> Option<Decimal> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Exact decimal from a JSON number, going through its textual form rather than `f64`.
pub fn decimal_from_number(n: &serde_json::Number) -> Option<Decimal> {
    let text = n.to_string();
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
}

/// Raw base-unit amount scaled down by the token's decimals.
pub fn scale_amount(raw: i128, decimals: u32) -> Option<Decimal> {
    Decimal::try_from_i128_with_scale(raw, decimals).ok().map(|d| d.normalize())
}

/// Orient a transfer relative to `wallet`: outgoing transfers flip sign and
/// report the receiver as the counterparty.
pub fn orient_transfer(
    wallet: &str,
    from: &str,
    to: &str,
    value: i128,
    same_address: impl Fn(&str, &str) -> bool,
) -> (String, i128) {
    if same_address(from, wallet) {
        (to.to_string(), -value)
    } else {
        (from.to_string(), value)
    }
}

pub fn utc_from_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

pub fn utc_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// `"2024-01-15 18:59:58"` in Moscow time (UTC+3), as MOEX reports it.
pub fn moscow_to_utc(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    let offset = FixedOffset::east_opt(MOSCOW_OFFSET_SECS)?;
    offset.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
}
