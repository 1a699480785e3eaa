use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use common::{
    format_decimal, normalize_symbol, ApiSource, Config, Error, HttpTransport, Kline, Payload,
    RequestDescriptor, Result,
};

use crate::binance::with_api_key;

pub const DEFAULT_INTERVAL: &str = "1h";
pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    #[default]
    Spot,
    Futures,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKind::Spot => write!(f, "spot"),
            MarketKind::Futures => write!(f, "futures"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuturesMarket {
    #[default]
    UsdM,
    CoinM,
}

impl FuturesMarket {
    pub fn as_str(self) -> &'static str {
        match self {
            FuturesMarket::UsdM => "usd_m",
            FuturesMarket::CoinM => "coin_m",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    #[default]
    Kline,
    MarkPriceKline,
    OpenInterest,
    OpenInterestHist,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Kline => "kline",
            DataType::MarkPriceKline => "markPriceKline",
            DataType::OpenInterest => "openInterest",
            DataType::OpenInterestHist => "openInterestHist",
        }
    }

    /// Everything except the open-interest snapshot is a time series.
    fn is_series(self) -> bool {
        !matches!(self, DataType::OpenInterest)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "source", content = "symbol")]
pub enum SymbolSource {
    Single(String),
    /// Symbols from the configured watchlist.
    Watchlist,
}

/// Parameters of one kline fetch. Spot ignores the futures fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KlineQuery {
    pub source: ApiSource,
    pub market: MarketKind,
    pub futures_market: FuturesMarket,
    pub data_type: DataType,
    pub symbols: SymbolSource,
    pub interval: String,
    pub limit: u32,
    /// Full URL prefix (`customUrl`) for the custom source.
    pub custom_url: String,
    /// Path appended to `custom_url`.
    pub custom_path: String,
}

impl Default for KlineQuery {
    fn default() -> Self {
        Self {
            source: ApiSource::Proxy,
            market: MarketKind::Spot,
            futures_market: FuturesMarket::UsdM,
            data_type: DataType::Kline,
            symbols: SymbolSource::Single("BTCUSDT".into()),
            interval: DEFAULT_INTERVAL.into(),
            limit: DEFAULT_LIMIT,
            custom_url: String::new(),
            custom_path: String::new(),
        }
    }
}

impl KlineQuery {
    /// Data type actually fetched. Spot always means plain klines.
    pub fn effective_data_type(&self) -> DataType {
        match self.market {
            MarketKind::Spot => DataType::Kline,
            MarketKind::Futures => self.data_type,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.source == ApiSource::Custom && self.custom_url.trim().is_empty() {
            return Err(Error::Validation("custom API source requires a URL".into()));
        }
        Ok(())
    }

    pub fn resolve_symbols(&self, cfg: &Config) -> Result<Vec<String>> {
        match &self.symbols {
            SymbolSource::Single(symbol) => {
                let symbol = normalize_symbol(symbol);
                if symbol.is_empty() {
                    return Err(Error::Validation("symbol is required".into()));
                }
                Ok(vec![symbol])
            }
            SymbolSource::Watchlist => cfg.watchlist_symbols(),
        }
    }

    /// The GET for one symbol.
    pub fn request(&self, symbol: &str, cfg: &Config) -> RequestDescriptor {
        let data_type = self.effective_data_type();
        let mut query = vec![("symbol".to_string(), symbol.to_string())];
        let series = |q: &mut Vec<(String, String)>| {
            q.push(("interval".into(), self.interval.clone()));
            q.push(("limit".into(), self.limit.to_string()));
        };

        let url = match (self.source, self.market) {
            (ApiSource::Proxy, MarketKind::Spot) => {
                series(&mut query);
                format!("{}/api/binance/price", cfg.proxy_url.trim_end_matches('/'))
            }
            (ApiSource::Proxy, MarketKind::Futures) => {
                query.push(("market_type".into(), self.futures_market.as_str().into()));
                if data_type.is_series() {
                    series(&mut query);
                }
                format!(
                    "{}/api/binance/futures/{data_type}",
                    cfg.proxy_url.trim_end_matches('/')
                )
            }
            (ApiSource::Custom, _) => {
                if data_type.is_series() {
                    series(&mut query);
                }
                format!("{}{}", self.custom_url, self.custom_path)
            }
            (ApiSource::Direct, MarketKind::Spot) => {
                series(&mut query);
                format!("{}{}klines", cfg.base_url, cfg.api_path)
            }
            (ApiSource::Direct, MarketKind::Futures) => {
                let base = &cfg.futures_base_url;
                let path = &cfg.futures_api_path;
                match data_type {
                    DataType::Kline => {
                        series(&mut query);
                        format!("{base}{path}klines")
                    }
                    DataType::MarkPriceKline => {
                        series(&mut query);
                        format!("{base}{path}markPriceKlines")
                    }
                    DataType::OpenInterest => format!("{base}{path}openInterest"),
                    DataType::OpenInterestHist => {
                        query.push(("period".into(), self.interval.clone()));
                        query.push(("limit".into(), self.limit.to_string()));
                        format!("{base}/futures/data/openInterestHist")
                    }
                }
            }
        };

        with_api_key(RequestDescriptor::get(url), &cfg.api_key).payload(Payload::Query(query))
    }

    /// Shape of the kline payload this query gets back.
    pub fn shape(&self) -> KlineShape {
        KlineShape::select(self.source, self.market, self.effective_data_type())
    }
}

// ─── Response normalization ───────────────────────────────────────────────────

/// The three upstream kline layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineShape {
    /// `{symbol, data: [{open_time, open_price, ..., quote_asset_volume, number_of_trades, ...}]}`
    ProxySpot,
    /// `{data: [{open_time, open_price, ..., quote_volume, trades, ...}]}`
    ProxyFutures,
    /// Binance array of arrays.
    Raw,
}

impl KlineShape {
    /// Chosen from the request, never by inspecting the payload.
    pub fn select(source: ApiSource, market: MarketKind, data_type: DataType) -> Self {
        match (source, market, data_type) {
            (ApiSource::Proxy, MarketKind::Spot, _) => KlineShape::ProxySpot,
            (ApiSource::Proxy, MarketKind::Futures, DataType::Kline) => KlineShape::ProxyFutures,
            _ => KlineShape::Raw,
        }
    }
}

struct ProxyFields {
    quote_volume: &'static str,
    trades: &'static str,
    taker_base: &'static str,
    taker_quote: &'static str,
}

const PROXY_SPOT_FIELDS: ProxyFields = ProxyFields {
    quote_volume: "quote_asset_volume",
    trades: "number_of_trades",
    taker_base: "taker_buy_base_asset_volume",
    taker_quote: "taker_buy_quote_asset_volume",
};

const PROXY_FUTURES_FIELDS: ProxyFields = ProxyFields {
    quote_volume: "quote_volume",
    trades: "trades",
    taker_base: "taker_buy_base_volume",
    taker_quote: "taker_buy_quote_volume",
};

pub fn normalize_klines(shape: KlineShape, payload: &Value) -> Result<Vec<Kline>> {
    match shape {
        KlineShape::ProxySpot => normalize_proxy(payload, &PROXY_SPOT_FIELDS),
        KlineShape::ProxyFutures => normalize_proxy(payload, &PROXY_FUTURES_FIELDS),
        KlineShape::Raw => normalize_raw(payload),
    }
}

fn normalize_proxy(payload: &Value, fields: &ProxyFields) -> Result<Vec<Kline>> {
    let rows = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Mapping("proxy kline response has no 'data' array".into()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let field = |name: &str| {
                row.get(name)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| Error::Mapping(format!("kline {i}: missing field '{name}'")))
            };
            Ok(Kline {
                open_time: iso_millis(field("open_time")?, i)?,
                open: decimal_text(field("open_price")?),
                high: decimal_text(field("high_price")?),
                low: decimal_text(field("low_price")?),
                close: decimal_text(field("close_price")?),
                volume: decimal_text(field("volume")?),
                close_time: iso_millis(field("close_time")?, i)?,
                quote_volume: decimal_text(field(fields.quote_volume)?),
                trades: count(field(fields.trades)?, i)?,
                taker_buy_base_volume: decimal_text(field(fields.taker_base)?),
                taker_buy_quote_volume: decimal_text(field(fields.taker_quote)?),
            })
        })
        .collect()
}

fn normalize_raw(payload: &Value) -> Result<Vec<Kline>> {
    let rows = payload
        .as_array()
        .ok_or_else(|| Error::Mapping("kline response is not an array".into()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let row = row
                .as_array()
                .ok_or_else(|| Error::Mapping(format!("kline {i} is not an array")))?;
            let at = |idx: usize| {
                row.get(idx).ok_or_else(|| {
                    Error::Mapping(format!(
                        "kline {i}: index {idx} out of range (row has {} fields)",
                        row.len()
                    ))
                })
            };
            Ok(Kline {
                open_time: millis(at(0)?, i)?,
                open: decimal_text(at(1)?),
                high: decimal_text(at(2)?),
                low: decimal_text(at(3)?),
                close: decimal_text(at(4)?),
                volume: decimal_text(at(5)?),
                close_time: millis(at(6)?, i)?,
                quote_volume: decimal_text(at(7)?),
                trades: count(at(8)?, i)?,
                taker_buy_base_volume: decimal_text(at(9)?),
                taker_buy_quote_volume: decimal_text(at(10)?),
            })
        })
        .collect()
}

/// Strings pass through untouched; numbers use their natural decimal form.
fn decimal_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n.as_f64().map(format_decimal).unwrap_or_default(),
        other => other.to_string(),
    }
}

fn millis(value: &Value, i: usize) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| Error::Mapping(format!("kline {i}: invalid timestamp {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Mapping(format!("kline {i}: invalid timestamp '{s}'"))),
        other => Err(Error::Mapping(format!("kline {i}: invalid timestamp {other}"))),
    }
}

/// ISO-8601 timestamps from the proxy. A missing offset means UTC.
fn iso_millis(value: &Value, i: usize) -> Result<i64> {
    let Some(text) = value.as_str() else {
        return millis(value, i);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|_| Error::Mapping(format!("kline {i}: invalid ISO timestamp '{text}'")))
}

fn count(value: &Value, i: usize) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| Error::Mapping(format!("kline {i}: invalid trade count {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Mapping(format!("kline {i}: invalid trade count '{s}'"))),
        other => Err(Error::Mapping(format!("kline {i}: invalid trade count {other}"))),
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineReport {
    pub symbol: String,
    pub market_type: MarketKind,
    pub data_type: DataType,
    pub interval: String,
    pub limit: u32,
    /// Close of the most recent kline.
    pub current_price: Option<String>,
    pub kline_count: usize,
    pub klines: Vec<Kline>,
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestReport {
    pub symbol: String,
    pub market_type: MarketKind,
    pub data_type: DataType,
    pub open_interest: Value,
    pub time: Value,
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestHistReport {
    pub symbol: String,
    pub market_type: MarketKind,
    pub data_type: DataType,
    pub open_interest_history: Vec<Value>,
    pub count: usize,
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MarketReport {
    Klines(KlineReport),
    OpenInterest(OpenInterestReport),
    OpenInterestHist(OpenInterestHistReport),
}

pub fn fetched_at_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds one report from the payload returned for `symbol`.
pub fn build_report(query: &KlineQuery, symbol: &str, payload: &Value) -> Result<MarketReport> {
    let data_type = query.effective_data_type();
    let fetched_at = fetched_at_now();

    match (query.market, data_type) {
        (MarketKind::Futures, DataType::OpenInterest) => {
            Ok(MarketReport::OpenInterest(OpenInterestReport {
                symbol: symbol.to_string(),
                market_type: query.market,
                data_type,
                open_interest: payload.get("openInterest").cloned().unwrap_or(Value::Null),
                time: payload.get("time").cloned().unwrap_or(Value::Null),
                fetched_at,
            }))
        }
        (MarketKind::Futures, DataType::OpenInterestHist) => {
            let history = payload
                .as_array()
                .cloned()
                .ok_or_else(|| Error::Mapping("open interest history is not an array".into()))?;
            Ok(MarketReport::OpenInterestHist(OpenInterestHistReport {
                symbol: symbol.to_string(),
                market_type: query.market,
                data_type,
                count: history.len(),
                open_interest_history: history,
                fetched_at,
            }))
        }
        _ => {
            let klines = normalize_klines(query.shape(), payload)?;
            Ok(MarketReport::Klines(KlineReport {
                symbol: symbol.to_string(),
                market_type: query.market,
                data_type,
                interval: query.interval.clone(),
                limit: query.limit,
                current_price: klines.last().map(|k| k.close.clone()),
                kline_count: klines.len(),
                klines,
                fetched_at,
            }))
        }
    }
}

/// Fetches candles or open interest for one symbol or the whole watchlist.
pub struct KlineFetcher {
    transport: Arc<dyn HttpTransport>,
    config: Config,
}

impl KlineFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, config: Config) -> Self {
        Self { transport, config }
    }

    /// One report per symbol, in watchlist order.
    pub async fn fetch(&self, query: &KlineQuery) -> Result<Vec<MarketReport>> {
        query.validate()?;
        let symbols = query.resolve_symbols(&self.config)?;
        let mut reports = Vec::with_capacity(symbols.len());

        for symbol in &symbols {
            let request = query.request(symbol, &self.config);
            debug!(symbol = %symbol, url = %request.url, "Fetching market data");
            let payload = self.transport.send(&request).await?;
            reports.push(build_report(query, symbol, &payload)?);
        }

        info!(
            count = reports.len(),
            market = %query.market,
            data_type = %query.effective_data_type(),
            "Market data fetched"
        );
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(source: ApiSource, market: MarketKind, data_type: DataType) -> KlineQuery {
        KlineQuery {
            source,
            market,
            data_type,
            ..KlineQuery::default()
        }
    }

    fn raw_row() -> Value {
        json!([
            1_700_000_000_000i64, "37000.01", "37100.00", "36900.50", "37050.25", "123.4",
            1_700_003_599_999i64, "4567890.1", 1500, "60.2", "2230000.5", "0"
        ])
    }

    #[test]
    fn shape_selection_follows_source_and_market() {
        use KlineShape::*;
        assert_eq!(KlineShape::select(ApiSource::Proxy, MarketKind::Spot, DataType::Kline), ProxySpot);
        assert_eq!(KlineShape::select(ApiSource::Proxy, MarketKind::Futures, DataType::Kline), ProxyFutures);
        assert_eq!(KlineShape::select(ApiSource::Proxy, MarketKind::Futures, DataType::MarkPriceKline), Raw);
        assert_eq!(KlineShape::select(ApiSource::Direct, MarketKind::Spot, DataType::Kline), Raw);
        assert_eq!(KlineShape::select(ApiSource::Custom, MarketKind::Spot, DataType::Kline), Raw);
    }

    #[test]
    fn raw_rows_map_by_index() {
        let klines = normalize_klines(KlineShape::Raw, &json!([raw_row()])).unwrap();
        let k = &klines[0];
        assert_eq!(k.open_time, 1_700_000_000_000);
        assert_eq!(k.open, "37000.01");
        assert_eq!(k.close, "37050.25");
        assert_eq!(k.close_time, 1_700_003_599_999);
        assert_eq!(k.trades, 1500);
        assert_eq!(k.taker_buy_quote_volume, "2230000.5");
    }

    #[test]
    fn short_raw_row_names_missing_index() {
        let err = normalize_klines(KlineShape::Raw, &json!([[1, "1", "2"]])).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        assert!(err.to_string().contains("index 3"));
    }

    #[test]
    fn proxy_spot_rows_parse_iso_times() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "count": 1,
            "data": [{
                "open_time": "2024-01-01T00:00:00",
                "open_price": 42000.5,
                "high_price": 42100,
                "low_price": 41900.25,
                "close_price": 42050.75,
                "volume": 10.5,
                "close_time": "2024-01-01T00:59:59.999Z",
                "quote_asset_volume": 441000.0,
                "number_of_trades": 321,
                "taker_buy_base_asset_volume": 5.25,
                "taker_buy_quote_asset_volume": 220500.0
            }]
        });
        let klines = normalize_klines(KlineShape::ProxySpot, &payload).unwrap();
        let k = &klines[0];
        assert_eq!(k.open_time, 1_704_067_200_000);
        assert_eq!(k.close_time, 1_704_070_799_999);
        assert_eq!(k.open, "42000.5");
        assert_eq!(k.high, "42100");
        assert_eq!(k.trades, 321);
    }

    #[test]
    fn proxy_futures_uses_its_own_field_names() {
        let payload = json!({
            "success": true,
            "data": [{
                "open_time": "2024-01-01T00:00:00Z",
                "open_price": 1.0, "high_price": 2.0, "low_price": 0.5, "close_price": 1.5,
                "volume": 100.0, "close_time": "2024-01-01T00:59:59Z",
                "quote_volume": 150.0, "trades": 7,
                "taker_buy_base_volume": 50.0, "taker_buy_quote_volume": 75.0
            }]
        });
        let klines = normalize_klines(KlineShape::ProxyFutures, &payload).unwrap();
        assert_eq!(klines[0].quote_volume, "150");
        assert_eq!(klines[0].trades, 7);

        // Spot field names are not accepted for the futures shape.
        let err = normalize_klines(KlineShape::ProxySpot, &payload).unwrap_err();
        assert!(err.to_string().contains("quote_asset_volume"));
    }

    #[test]
    fn request_endpoints() {
        let cfg = Config::default();

        let req = query(ApiSource::Proxy, MarketKind::Spot, DataType::Kline).request("BTCUSDT", &cfg);
        assert_eq!(req.url, "http://api:8000/api/binance/price");
        assert_eq!(req.param("interval").as_deref(), Some("1h"));
        assert_eq!(req.param("limit").as_deref(), Some("50"));

        let req = query(ApiSource::Proxy, MarketKind::Futures, DataType::OpenInterest)
            .request("BTCUSDT", &cfg);
        assert_eq!(req.url, "http://api:8000/api/binance/futures/openInterest");
        assert_eq!(req.param("market_type").as_deref(), Some("usd_m"));
        assert_eq!(req.param("interval"), None);

        let req = query(ApiSource::Direct, MarketKind::Futures, DataType::MarkPriceKline)
            .request("BTCUSDT", &cfg);
        assert_eq!(req.url, "https://fapi.binance.com/fapi/v1/markPriceKlines");

        let req = query(ApiSource::Direct, MarketKind::Futures, DataType::OpenInterestHist)
            .request("BTCUSDT", &cfg);
        assert_eq!(req.url, "https://fapi.binance.com/futures/data/openInterestHist");
        assert_eq!(req.param("period").as_deref(), Some("1h"));

        let req = query(ApiSource::Direct, MarketKind::Spot, DataType::OpenInterest)
            .request("BTCUSDT", &cfg);
        assert_eq!(req.url, "https://api.binance.com/api/v3/klines");
    }

    #[test]
    fn limit_is_bounded() {
        let mut q = KlineQuery::default();
        q.limit = 0;
        assert!(q.validate().is_err());
        q.limit = 1001;
        assert!(q.validate().is_err());
        q.limit = 1000;
        assert!(q.validate().is_ok());
    }

    #[test]
    fn watchlist_symbols_come_from_config() {
        let q = KlineQuery {
            symbols: SymbolSource::Watchlist,
            ..KlineQuery::default()
        };
        assert!(q.resolve_symbols(&Config::default()).is_err());

        let cfg = Config {
            watchlist: "btcusdt, solusdt".into(),
            ..Config::default()
        };
        assert_eq!(q.resolve_symbols(&cfg).unwrap(), vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[test]
    fn report_current_price_is_last_close() {
        let q = query(ApiSource::Direct, MarketKind::Spot, DataType::Kline);
        let report = build_report(&q, "BTCUSDT", &json!([raw_row(), raw_row()])).unwrap();
        match report {
            MarketReport::Klines(r) => {
                assert_eq!(r.kline_count, 2);
                assert_eq!(r.current_price.as_deref(), Some("37050.25"));
                assert_eq!(r.data_type, DataType::Kline);
            }
            other => panic!("expected klines, got {other:?}"),
        }
    }
}
