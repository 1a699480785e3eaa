use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use common::{
    normalize_symbol, parse_symbol_list, Error, HttpTransport, Payload, RequestDescriptor, Result,
};

use crate::binance::with_api_key;
use crate::klines::fetched_at_now;

/// The simple price endpoint accepts at most this many symbols per call.
pub const MAX_SIMPLE_SYMBOLS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerMarket {
    #[default]
    Spot,
    FuturesUsdM,
    FuturesCoinM,
}

impl TickerMarket {
    pub fn default_base_url(self) -> &'static str {
        match self {
            TickerMarket::Spot => "https://api.binance.com",
            TickerMarket::FuturesUsdM => "https://fapi.binance.com",
            TickerMarket::FuturesCoinM => "https://dapi.binance.com",
        }
    }

    fn api_prefix(self) -> &'static str {
        match self {
            TickerMarket::Spot => "/api/v3",
            TickerMarket::FuturesUsdM => "/fapi/v1",
            TickerMarket::FuturesCoinM => "/dapi/v1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    #[default]
    Simple,
    #[serde(rename = "stats_24h")]
    Stats24h,
}

impl PriceType {
    fn endpoint(self) -> &'static str {
        match self {
            PriceType::Simple => "ticker/price",
            PriceType::Stats24h => "ticker/24hr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerQuery {
    /// Replaces the market's default base URL when set.
    #[serde(default)]
    pub custom_url: Option<String>,
    #[serde(default)]
    pub market: TickerMarket,
    #[serde(default)]
    pub price_type: PriceType,
    /// Comma-separated symbols (one for `single`, several for watchlist/batch).
    pub symbols: String,
    #[serde(default)]
    pub api_key: String,
}

impl TickerQuery {
    pub fn new(symbols: impl Into<String>) -> Self {
        Self {
            custom_url: None,
            market: TickerMarket::Spot,
            price_type: PriceType::Simple,
            symbols: symbols.into(),
            api_key: String::new(),
        }
    }

    pub fn url(&self) -> String {
        let base = self
            .custom_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.market.default_base_url());
        format!(
            "{base}{}/{}",
            self.market.api_prefix(),
            self.price_type.endpoint()
        )
    }

    pub fn symbol_list(&self) -> Result<Vec<String>> {
        let symbols = parse_symbol_list(&self.symbols);
        if symbols.is_empty() {
            return Err(Error::Validation("No valid symbols provided".into()));
        }
        Ok(symbols)
    }

    /// One request for simple prices, one per symbol for 24h stats.
    pub fn requests(&self) -> Result<Vec<RequestDescriptor>> {
        let symbols = self.symbol_list()?;
        let url = self.url();
        let get = |query: Vec<(String, String)>| {
            with_api_key(RequestDescriptor::get(url.clone()), &self.api_key)
                .payload(Payload::Query(query))
        };

        match self.price_type {
            PriceType::Simple => {
                if symbols.len() > MAX_SIMPLE_SYMBOLS {
                    return Err(Error::Validation(format!(
                        "Maximum {MAX_SIMPLE_SYMBOLS} symbols allowed for simple price endpoint"
                    )));
                }
                let query = match symbols.as_slice() {
                    [one] => vec![("symbol".to_string(), one.clone())],
                    many => vec![("symbols".to_string(), serde_json::to_string(many)?)],
                };
                Ok(vec![get(query)])
            }
            PriceType::Stats24h => Ok(symbols
                .into_iter()
                .map(|s| get(vec![("symbol".to_string(), s)]))
                .collect()),
        }
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceReport {
    pub symbol: String,
    pub market_type: TickerMarket,
    pub price_type: PriceType,
    pub price: String,
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPriceReport {
    pub prices: Vec<PricePoint>,
    pub market_type: TickerMarket,
    pub price_type: PriceType,
    pub count: usize,
    pub fetched_at: String,
}

/// Binance `ticker/24hr` body, the fields that are passed through.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    price_change: String,
    price_change_percent: String,
    #[serde(default)]
    weighted_avg_price: Option<String>,
    last_price: String,
    #[serde(default)]
    last_qty: Option<String>,
    open_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    #[serde(default)]
    quote_volume: Option<String>,
    open_time: i64,
    close_time: i64,
    count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats24hReport {
    pub symbol: String,
    pub market_type: TickerMarket,
    pub price_type: PriceType,
    pub price_change: String,
    pub price_change_percent: String,
    pub weighted_avg_price: Option<String>,
    pub last_price: String,
    pub last_qty: Option<String>,
    pub open_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: Option<String>,
    pub open_time: i64,
    pub close_time: i64,
    pub trades: u64,
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TickerReport {
    Price(PriceReport),
    Batch(BatchPriceReport),
    Stats(Box<Stats24hReport>),
}

/// Spot and futures ticker prices.
pub struct TickerFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl TickerFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(&self, query: &TickerQuery) -> Result<Vec<TickerReport>> {
        let requests = query.requests()?;
        let fetched_at = fetched_at_now();
        let mut reports = Vec::with_capacity(requests.len());

        for request in &requests {
            debug!(url = %request.url, "Fetching ticker");
            let body = self.transport.send(request).await?;
            reports.push(to_report(query, body, &fetched_at)?);
        }

        info!(count = reports.len(), "Ticker fetched");
        Ok(reports)
    }
}

fn to_report(query: &TickerQuery, body: Value, fetched_at: &str) -> Result<TickerReport> {
    let mapping = |e: serde_json::Error| Error::Mapping(format!("unexpected ticker response: {e}"));

    match query.price_type {
        PriceType::Simple if body.is_array() => {
            let prices: Vec<PricePoint> = serde_json::from_value(body).map_err(mapping)?;
            Ok(TickerReport::Batch(BatchPriceReport {
                count: prices.len(),
                prices,
                market_type: query.market,
                price_type: PriceType::Simple,
                fetched_at: fetched_at.to_string(),
            }))
        }
        PriceType::Simple => {
            let point: PricePoint = serde_json::from_value(body).map_err(mapping)?;
            Ok(TickerReport::Price(PriceReport {
                symbol: normalize_symbol(&point.symbol),
                market_type: query.market,
                price_type: PriceType::Simple,
                price: point.price,
                fetched_at: fetched_at.to_string(),
            }))
        }
        PriceType::Stats24h => {
            // COIN-M answers a single-symbol request with a one-element array.
            let body = match body {
                Value::Array(mut items) if items.len() == 1 => items.remove(0),
                Value::Array(items) => {
                    return Err(Error::Mapping(format!(
                        "expected one 24h ticker, got {}",
                        items.len()
                    )))
                }
                other => other,
            };
            let t: Ticker24h = serde_json::from_value(body).map_err(mapping)?;
            Ok(TickerReport::Stats(Box::new(Stats24hReport {
                symbol: t.symbol,
                market_type: query.market,
                price_type: PriceType::Stats24h,
                price_change: t.price_change,
                price_change_percent: t.price_change_percent,
                weighted_avg_price: t.weighted_avg_price,
                last_price: t.last_price,
                last_qty: t.last_qty,
                open_price: t.open_price,
                high_price: t.high_price,
                low_price: t.low_price,
                volume: t.volume,
                quote_volume: t.quote_volume,
                open_time: t.open_time,
                close_time: t.close_time,
                trades: t.count,
                fetched_at: fetched_at.to_string(),
            })))
        }
    }
}
