use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{parse_symbol_list, Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_API_PATH: &str = "/api/v3/";
pub const DEFAULT_FUTURES_BASE_URL: &str = "https://fapi.binance.com";
pub const DEFAULT_FUTURES_API_PATH: &str = "/fapi/v1/";
pub const DEFAULT_PROXY_URL: &str = "http://api:8000";

/// Whether requests go to a real upstream or to the in-memory paper exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Live,
    Paper,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(TradingMode::Live),
            "paper" => Ok(TradingMode::Paper),
            other => Err(Error::Config(format!(
                "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
            ))),
        }
    }
}

/// Credentials and endpoint settings. Every field has a default except the
/// key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: String,
    pub api_secret: String,
    /// Comma-separated, as entered by the operator.
    pub watchlist: String,

    pub base_url: String,
    pub api_path: String,
    pub futures_base_url: String,
    pub futures_api_path: String,
    pub proxy_url: String,

    /// Appended to signed requests when set.
    pub recv_window: Option<u64>,

    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            watchlist: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            futures_base_url: DEFAULT_FUTURES_BASE_URL.to_string(),
            futures_api_path: DEFAULT_FUTURES_API_PATH.to_string(),
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            recv_window: None,
            trading_mode: TradingMode::Live,
            paper_slippage_bps: 10.0,
        }
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("watchlist", &self.watchlist)
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("futures_base_url", &self.futures_base_url)
            .field("futures_api_path", &self.futures_api_path)
            .field("proxy_url", &self.proxy_url)
            .field("recv_window", &self.recv_window)
            .field("trading_mode", &self.trading_mode)
            .field("paper_slippage_bps", &self.paper_slippage_bps)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads `.env` if present. Blank values fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let recv_window = get("BINANCE_RECV_WINDOW")
            .map(|v| {
                v.trim().parse::<u64>().map_err(|_| {
                    Error::Config(format!("BINANCE_RECV_WINDOW must be an integer, got '{v}'"))
                })
            })
            .transpose()?;

        let trading_mode = get("TRADING_MODE")
            .map(|v| v.parse::<TradingMode>())
            .transpose()?
            .unwrap_or(defaults.trading_mode);

        let paper_slippage_bps = get("PAPER_SLIPPAGE_BPS")
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| {
                    Error::Config(format!("PAPER_SLIPPAGE_BPS must be a number, got '{v}'"))
                })
            })
            .transpose()?
            .unwrap_or(defaults.paper_slippage_bps);

        Ok(Config {
            api_key: get("BINANCE_API_KEY").unwrap_or_default(),
            api_secret: get("BINANCE_API_SECRET").unwrap_or_default(),
            watchlist: get("BINANCE_WATCHLIST").unwrap_or_default(),
            base_url: get("BINANCE_BASE_URL").unwrap_or(defaults.base_url),
            api_path: get("BINANCE_API_PATH").unwrap_or(defaults.api_path),
            futures_base_url: get("BINANCE_FUTURES_BASE_URL").unwrap_or(defaults.futures_base_url),
            futures_api_path: get("BINANCE_FUTURES_API_PATH").unwrap_or(defaults.futures_api_path),
            proxy_url: get("BINANCE_PROXY_URL").unwrap_or(defaults.proxy_url),
            recv_window,
            trading_mode,
            paper_slippage_bps,
        })
    }

    /// Watchlist symbols, upper-cased. Errors when nothing usable is configured.
    pub fn watchlist_symbols(&self) -> Result<Vec<String>> {
        if self.watchlist.trim().is_empty() {
            return Err(Error::Validation(
                "Watchlist is empty. Please add symbols to your Binance watchlist.".into(),
            ));
        }
        let symbols = parse_symbol_list(&self.watchlist);
        if symbols.is_empty() {
            return Err(Error::Validation(
                "No valid symbols found in watchlist. Please check your watchlist format (e.g., BTCUSDT, ETHUSDT, SOLUSDT).".into(),
            ));
        }
        Ok(symbols)
    }

    /// Secret for direct signing. Errors when unset.
    pub fn signing_secret(&self) -> Result<&str> {
        if self.api_secret.is_empty() {
            return Err(Error::Config(
                "BINANCE_API_SECRET is required for direct signed requests".into(),
            ));
        }
        Ok(&self.api_secret)
    }
}
