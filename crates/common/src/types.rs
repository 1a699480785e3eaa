use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened on `self`.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(Error::Validation(format!("unknown order side '{other}'"))),
        }
    }
}

/// Binance spot order types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    LimitMaker,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
            OrderType::LimitMaker => "LIMIT_MAKER",
        }
    }

    /// Limit-family types carry a price.
    pub fn requires_price(self) -> bool {
        matches!(
            self,
            OrderType::Limit
                | OrderType::StopLossLimit
                | OrderType::TakeProfitLimit
                | OrderType::LimitMaker
        )
    }

    /// Stop/take-profit family types carry a trigger price.
    pub fn requires_stop_price(self) -> bool {
        matches!(
            self,
            OrderType::StopLoss
                | OrderType::StopLossLimit
                | OrderType::TakeProfit
                | OrderType::TakeProfitLimit
        )
    }

    /// Binance rejects these types without `timeInForce`.
    pub fn requires_time_in_force(self) -> bool {
        matches!(
            self,
            OrderType::Limit | OrderType::StopLossLimit | OrderType::TakeProfitLimit
        )
    }

    pub fn supports_bracket(self) -> bool {
        matches!(self, OrderType::Market | OrderType::Limit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            "STOP_LOSS" => OrderType::StopLoss,
            "STOP_LOSS_LIMIT" => OrderType::StopLossLimit,
            "TAKE_PROFIT" => OrderType::TakeProfit,
            "TAKE_PROFIT_LIMIT" => OrderType::TakeProfitLimit,
            "LIMIT_MAKER" => OrderType::LimitMaker,
            other => return Err(Error::Validation(format!("unknown order type '{other}'"))),
        };
        Ok(ty)
    }
}

/// How the stop-loss leg of a bracket executes once triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum StopLossType {
    #[default]
    Market,
    Limit,
}

impl FromStr for StopLossType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Ok(StopLossType::Market),
            "LIMIT" => Ok(StopLossType::Limit),
            other => Err(Error::Validation(format!("unknown stop-loss type '{other}'"))),
        }
    }
}

/// Which upstream an operation talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ApiSource {
    /// Internal proxy service (`/api/binance/...`).
    #[default]
    Proxy,
    /// Binance REST directly, HMAC-signed where required.
    Direct,
    /// Operator-supplied base URL and paths, proxy-shaped requests.
    Custom,
}

impl fmt::Display for ApiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiSource::Proxy => write!(f, "proxy"),
            ApiSource::Direct => write!(f, "direct"),
            ApiSource::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for ApiSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(ApiSource::Proxy),
            "direct" => Ok(ApiSource::Direct),
            "custom" => Ok(ApiSource::Custom),
            other => Err(Error::Validation(format!("unknown api source '{other}'"))),
        }
    }
}

// Input enums deserialize through `FromStr`, so any case is accepted.
impl TryFrom<String> for OrderSide {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<String> for OrderType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<String> for StopLossType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<String> for ApiSource {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// ─── Order intent ─────────────────────────────────────────────────────────────

/// Take-profit / stop-loss legs attached to a MARKET or LIMIT entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketSpec {
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
    #[serde(default)]
    pub stop_loss_type: StopLossType,
    /// Only meaningful when `stop_loss_type` is `Limit`.
    #[serde(default)]
    pub stop_loss_limit_price: Option<f64>,
}

impl BracketSpec {
    /// Stop-limit price for the stop leg, `None` under market-style stops.
    pub fn stop_limit_price(&self) -> Option<f64> {
        match self.stop_loss_type {
            StopLossType::Limit => self.stop_loss_limit_price,
            StopLossType::Market => None,
        }
    }
}

/// A desired trade. Build it from [`OrderInput`] or by hand, then call
/// [`OrderIntent::validate`] before turning it into requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub bracket: Option<BracketSpec>,
}

impl OrderIntent {
    pub fn new(symbol: impl Into<String>, side: OrderSide, order_type: OrderType, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            bracket: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_stop_price(mut self, stop_price: f64) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    pub fn with_bracket(mut self, bracket: BracketSpec) -> Self {
        self.bracket = Some(bracket);
        self
    }

    /// Upper-cased symbol as transmitted.
    pub fn normalized_symbol(&self) -> String {
        normalize_symbol(&self.symbol)
    }

    /// Price to transmit, if this order type uses one.
    pub fn effective_price(&self) -> Option<f64> {
        self.order_type.requires_price().then_some(self.price).flatten()
    }

    /// Stop price to transmit, if this order type uses one.
    pub fn effective_stop_price(&self) -> Option<f64> {
        self.order_type.requires_stop_price().then_some(self.stop_price).flatten()
    }

    /// Check every invariant that must hold before any request is sent.
    pub fn validate(&self) -> Result<()> {
        validate_symbol(&self.symbol)?;

        if !is_positive(Some(self.quantity)) {
            return Err(Error::Validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.requires_price() && !is_positive(self.price) {
            return Err(Error::Validation(format!(
                "{} orders require a positive price",
                self.order_type
            )));
        }
        if self.order_type.requires_stop_price() && !is_positive(self.stop_price) {
            return Err(Error::Validation(format!(
                "{} orders require a positive stop price",
                self.order_type
            )));
        }

        if let Some(bracket) = &self.bracket {
            if !self.order_type.supports_bracket() {
                return Err(Error::Validation(format!(
                    "bracket orders require a MARKET or LIMIT entry, got {}",
                    self.order_type
                )));
            }
            if !is_positive(Some(bracket.take_profit_price))
                || !is_positive(Some(bracket.stop_loss_price))
            {
                return Err(Error::Validation(
                    "bracket orders require both a take-profit price and a stop-loss price".into(),
                ));
            }
            if bracket.stop_loss_type == StopLossType::Limit
                && !is_positive(bracket.stop_loss_limit_price)
            {
                return Err(Error::Validation(
                    "LIMIT stop-loss requires a stop-loss limit price".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Flat order parameters as a workflow item carries them
/// (`useBracket`, `takeProfitPrice`, ... side by side with the entry fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInput {
    pub symbol: String,
    pub side: Option<OrderSide>,
    #[serde(rename = "type")]
    pub order_type: Option<OrderType>,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub use_bracket: bool,
    #[serde(default)]
    pub take_profit_price: Option<f64>,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub stop_loss_type: Option<StopLossType>,
    #[serde(default)]
    pub stop_loss_limit_price: Option<f64>,
}

impl TryFrom<OrderInput> for OrderIntent {
    type Error = Error;

    fn try_from(input: OrderInput) -> Result<Self> {
        let bracket = if input.use_bracket {
            let (Some(take_profit_price), Some(stop_loss_price)) =
                (input.take_profit_price, input.stop_loss_price)
            else {
                return Err(Error::Validation(
                    "bracket orders require both a take-profit price and a stop-loss price".into(),
                ));
            };
            let stop_loss_type = input.stop_loss_type.unwrap_or_default();
            Some(BracketSpec {
                take_profit_price,
                stop_loss_price,
                stop_loss_type,
                stop_loss_limit_price: match stop_loss_type {
                    StopLossType::Limit => input.stop_loss_limit_price,
                    StopLossType::Market => None,
                },
            })
        } else {
            None
        };

        let intent = OrderIntent {
            symbol: normalize_symbol(&input.symbol),
            side: input
                .side
                .ok_or_else(|| Error::Validation("order side is required".into()))?,
            order_type: input.order_type.unwrap_or(OrderType::Market),
            quantity: input.quantity,
            // Zero means unset.
            price: input.price.filter(|p| *p != 0.0),
            stop_price: input.stop_price.filter(|p| *p != 0.0),
            bracket,
        };
        intent.validate()?;
        Ok(intent)
    }
}

/// Trim and upper-case a symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn validate_symbol(symbol: &str) -> Result<()> {
    let symbol = symbol.trim();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!(
            "symbol must contain only alphanumeric characters, got '{symbol}'"
        )));
    }
    Ok(())
}

fn is_positive(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v.is_finite() && v > 0.0)
}

/// Split a comma-separated symbol list, trimming and upper-casing each entry.
pub fn parse_symbol_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(normalize_symbol)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Format a decimal the way it is transmitted: shortest round-trip form,
/// no trailing `.0` on integral values.
pub fn format_decimal(value: f64) -> String {
    format!("{value}")
}

// ─── Exchange responses ───────────────────────────────────────────────────────

/// Normalized single-order response. Binance sends decimals as strings,
/// the proxy as numbers; both are accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub transact_time: Option<i64>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub orig_qty: Option<f64>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub executed_qty: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub order_type: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
}

impl OrderResponse {
    /// Executed quantity when the exchange reported a positive fill.
    pub fn filled_quantity(&self) -> Option<f64> {
        self.executed_qty.filter(|q| q.is_finite() && *q > 0.0)
    }
}

/// One order inside an OCO/OTOCO list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListEntry {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

/// Normalized OCO / OTOCO response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub order_list_id: i64,
    #[serde(default)]
    pub contingency_type: Option<String>,
    #[serde(default)]
    pub list_status_type: Option<String>,
    #[serde(default)]
    pub list_order_status: Option<String>,
    #[serde(default)]
    pub list_client_order_id: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<i64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub orders: Vec<OrderListEntry>,
}

fn flexible_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid decimal '{s}': {e}"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected decimal string or number, got {other}"
        ))),
    }
}

// ─── Market data ──────────────────────────────────────────────────────────────

/// Normalized candlestick. Decimals stay strings so no precision is lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    /// Epoch milliseconds.
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    /// Epoch milliseconds.
    pub close_time: i64,
    pub quote_volume: String,
    pub trades: u64,
    pub taker_buy_base_volume: String,
    pub taker_buy_quote_volume: String,
}
