// Layered settings: defaults -> optional TOML file -> RATESREADER__* env vars.
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "ratesreader.toml";
pub const ENV_PREFIX: &str = "RATESREADER";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                              Chrome/86.0.4240.198 Safari/537.36 OPR/72.0.3815.465 (Edition Yx GX)";

pub const YAHOO_API_URL: &str = "https://query2.finance.yahoo.com/v7/finance/quote";
pub const YAHOO_SYMBOLS: &str = "USDRUB=X,CNYRUB=X,USDCNY=X,EURRUB=X,BTC-USD";

pub const MOEX_API_URL: &str =
    "https://iss.moex.com/iss/engines/currency/markets/selt/boards/CETS/securities.json";
pub const MOEX_SYMBOLS: &str = "USD000UTSTOM,CNYRUB_TOM,EUR_RUB__TOM";

pub const GARANTEX_API_URL: &str = "https://garantex.io/api/v2/depth";
pub const GARANTEX_MARKET: &str = "usdtrub";

pub const TRON_API_URL: &str = "https://api.trongrid.io/v1/accounts/";
pub const TRON_USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

pub const BSCSCAN_API_URL: &str = "https://api.bscscan.com/api/";
pub const BSCSCAN_USDT_CONTRACT: &str = "0x55d398326f99059ff775485246999027b3197955";

pub const XE_URL: &str = "https://www.xe.com/currencyconverter/convert/";
pub const XE_CURRENCIES: &str = "RUB, USD, CNY, XBT";
pub const XE_PAIRS: &str = "USD/RUB";

/// Errors raised while building configuration, before any network I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("request target can not be empty")]
    EmptyTarget,
    #[error("{0} must contain at least one entry")]
    EmptyTargetSet(&'static str),
    #[error("following currency pairs not supported: {}", .0.join(", "))]
    UnsupportedPairs(Vec<String>),
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A list of targets written either as `"a, b, c"` or as `["a", "b", "c"]`.
///
/// Any other shape is rejected when the settings are deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    Joined(String),
    List(Vec<String>),
}

impl TargetSpec {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TargetSpec::Joined(s) => s
                .split(',')
                .map(|part| part.split_whitespace().collect::<String>())
                .filter(|part| !part.is_empty())
                .collect(),
            TargetSpec::List(items) => items
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

impl From<&str> for TargetSpec {
    fn from(value: &str) -> Self {
        TargetSpec::Joined(value.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_idle_per_host: Option<usize>,
}

impl HttpSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            request_timeout_secs: Some(30),
            connect_timeout_secs: Some(10),
            max_idle_per_host: Some(8),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub url: String,
    pub symbols: TargetSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GarantexSettings {
    pub url: String,
    pub market: String,
}

impl Default for GarantexSettings {
    fn default() -> Self {
        Self { url: GARANTEX_API_URL.to_string(), market: GARANTEX_MARKET.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletFeedSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub contract: String,
    pub wallets: TargetSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XeSettings {
    pub url: String,
    pub currencies: TargetSpec,
    pub pairs: TargetSpec,
    pub selector: Option<String>,
}

impl Default for XeSettings {
    fn default() -> Self {
        Self {
            url: XE_URL.to_string(),
            currencies: XE_CURRENCIES.into(),
            pairs: XE_PAIRS.into(),
            selector: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageSettings {
    pub url: String,
    pub selector: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_filter: String,
    pub http: HttpSettings,
    pub yahoo: FeedSettings,
    pub moex: FeedSettings,
    pub garantex: GarantexSettings,
    pub tron: WalletFeedSettings,
    pub bscscan: WalletFeedSettings,
    pub xe: XeSettings,
    pub pages: Vec<PageSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            http: HttpSettings::default(),
            yahoo: FeedSettings { url: YAHOO_API_URL.to_string(), symbols: YAHOO_SYMBOLS.into() },
            moex: FeedSettings { url: MOEX_API_URL.to_string(), symbols: MOEX_SYMBOLS.into() },
            garantex: GarantexSettings::default(),
            tron: WalletFeedSettings {
                url: TRON_API_URL.to_string(),
                api_key: None,
                contract: TRON_USDT_CONTRACT.to_string(),
                wallets: TargetSpec::List(Vec::new()),
            },
            bscscan: WalletFeedSettings {
                url: BSCSCAN_API_URL.to_string(),
                api_key: None,
                contract: BSCSCAN_USDT_CONTRACT.to_string(),
                wallets: TargetSpec::List(Vec::new()),
            },
            xe: XeSettings::default(),
            pages: Vec::new(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self { url: String::new(), symbols: TargetSpec::List(Vec::new()) }
    }
}

impl Default for WalletFeedSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            contract: String::new(),
            wallets: TargetSpec::List(Vec::new()),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or `ratesreader.toml` if present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }
}
