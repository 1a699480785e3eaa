use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use tracing::{error, info, warn};

use common::{
    format_decimal, ApiSource, BracketSpec, Config, Error, HttpTransport, OrderIntent,
    OrderListResponse, OrderResponse, OrderSide, OrderType, Payload, RequestDescriptor, Result,
};

use crate::binance::{timestamp_ms, with_api_key, Signer};

const GOOD_TILL_CANCEL: &str = "GTC";
/// Time-in-force for the stop-limit leg of a bracket exit.
const STOP_LIMIT_TIME_IN_FORCE: &str = "GTE_GTC";

/// Largest magnitude below which every whole f64 is an exact integer (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

pub const DEFAULT_CUSTOM_ORDER_PATH: &str = "/api/v3/order";
pub const DEFAULT_CUSTOM_OCO_PATH: &str = "/api/v3/order/oco";
pub const DEFAULT_CUSTOM_OTOCO_PATH: &str = "/api/v3/orderList/otoco";

// ─── Routing ──────────────────────────────────────────────────────────────────

/// Operator-supplied base URL and paths for the `custom` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomEndpoint {
    pub base_url: String,
    pub order_path: String,
    pub oco_path: String,
    pub otoco_path: String,
}

impl Default for CustomEndpoint {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            order_path: DEFAULT_CUSTOM_ORDER_PATH.to_string(),
            oco_path: DEFAULT_CUSTOM_OCO_PATH.to_string(),
            otoco_path: DEFAULT_CUSTOM_OTOCO_PATH.to_string(),
        }
    }
}

impl CustomEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Full URLs of the three order endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEndpoints {
    pub order: String,
    pub oco: String,
    pub otoco: String,
}

impl OrderEndpoints {
    pub fn proxy(proxy_url: &str) -> Self {
        let base = proxy_url.trim_end_matches('/');
        Self {
            order: format!("{base}/api/binance/order"),
            oco: format!("{base}/api/binance/order/oco"),
            otoco: format!("{base}/api/binance/orderList/otoco"),
        }
    }

    pub fn custom(endpoint: &CustomEndpoint) -> Self {
        let base = &endpoint.base_url;
        Self {
            order: format!("{base}{}", endpoint.order_path),
            oco: format!("{base}{}", endpoint.oco_path),
            otoco: format!("{base}{}", endpoint.otoco_path),
        }
    }

    pub fn direct(base_url: &str, api_path: &str) -> Self {
        Self {
            order: format!("{base_url}{api_path}order"),
            oco: format!("{base_url}{api_path}order/oco"),
            otoco: format!("{base_url}{api_path}orderList/otoco"),
        }
    }
}

/// Where order requests go and how they are authenticated.
///
/// `proxy` and `custom` send JSON bodies with the API-key header; `direct`
/// sends HMAC-signed form bodies.
#[derive(Debug, Clone)]
pub struct OrderRoute {
    source: ApiSource,
    endpoints: OrderEndpoints,
    api_key: String,
    signer: Option<Signer>,
}

impl OrderRoute {
    pub fn proxy(proxy_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            source: ApiSource::Proxy,
            endpoints: OrderEndpoints::proxy(proxy_url),
            api_key: api_key.into(),
            signer: None,
        }
    }

    pub fn custom(endpoint: &CustomEndpoint, api_key: impl Into<String>) -> Self {
        Self {
            source: ApiSource::Custom,
            endpoints: OrderEndpoints::custom(endpoint),
            api_key: api_key.into(),
            signer: None,
        }
    }

    pub fn direct(base_url: &str, api_path: &str, signer: Signer) -> Self {
        Self {
            source: ApiSource::Direct,
            endpoints: OrderEndpoints::direct(base_url, api_path),
            api_key: signer.api_key().to_string(),
            signer: Some(signer),
        }
    }

    pub fn from_config(
        source: ApiSource,
        cfg: &Config,
        custom: Option<&CustomEndpoint>,
    ) -> Result<Self> {
        match source {
            ApiSource::Proxy => Ok(Self::proxy(&cfg.proxy_url, cfg.api_key.clone())),
            ApiSource::Direct => Ok(Self::direct(
                &cfg.base_url,
                &cfg.api_path,
                Signer::from_config(cfg)?,
            )),
            ApiSource::Custom => match custom {
                Some(endpoint) if !endpoint.base_url.trim().is_empty() => {
                    Ok(Self::custom(endpoint, cfg.api_key.clone()))
                }
                _ => Err(Error::Config(
                    "custom API source requires a base URL".into(),
                )),
            },
        }
    }

    pub fn source(&self) -> ApiSource {
        self.source
    }

    pub fn endpoints(&self) -> &OrderEndpoints {
        &self.endpoints
    }

    /// The single-order request for `intent`.
    pub fn entry_request(&self, intent: &OrderIntent, timestamp_ms: i64) -> Result<RequestDescriptor> {
        let mut params = vec![
            ("symbol", Param::text(intent.normalized_symbol())),
            ("side", Param::text(intent.side.as_str())),
            ("type", Param::text(intent.order_type.as_str())),
            ("quantity", Param::Decimal(intent.quantity)),
        ];
        if intent.order_type.requires_time_in_force() {
            params.push(("timeInForce", Param::text(GOOD_TILL_CANCEL)));
        }
        if let Some(price) = intent.effective_price() {
            params.push(("price", Param::Decimal(price)));
        }
        if let Some(stop_price) = intent.effective_stop_price() {
            params.push(("stopPrice", Param::Decimal(stop_price)));
        }
        self.build(&self.endpoints.order, params, timestamp_ms)
    }

    /// The two-leg exit placed after a market entry fills.
    pub fn oco_request(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        bracket: &BracketSpec,
        timestamp_ms: i64,
    ) -> Result<RequestDescriptor> {
        let mut params = vec![
            ("symbol", Param::text(common::normalize_symbol(symbol))),
            ("side", Param::text(side.as_str())),
            ("quantity", Param::Decimal(quantity)),
            ("price", Param::Decimal(bracket.take_profit_price)),
            ("stopPrice", Param::Decimal(bracket.stop_loss_price)),
        ];
        if let Some(limit) = bracket.stop_limit_price() {
            params.push(("stopLimitPrice", Param::Decimal(limit)));
            params.push(("stopLimitTimeInForce", Param::text(STOP_LIMIT_TIME_IN_FORCE)));
        }
        self.build(&self.endpoints.oco, params, timestamp_ms)
    }

    /// Limit entry plus its pending exit, in one call.
    pub fn otoco_request(
        &self,
        intent: &OrderIntent,
        bracket: &BracketSpec,
        timestamp_ms: i64,
    ) -> Result<RequestDescriptor> {
        let working_price = intent.effective_price().ok_or_else(|| {
            Error::Validation("LIMIT bracket entry requires a price".into())
        })?;
        let exit_side = intent.side.opposite();

        let mut params = vec![
            ("symbol", Param::text(intent.normalized_symbol())),
            ("workingType", Param::text(OrderType::Limit.as_str())),
            ("workingSide", Param::text(intent.side.as_str())),
            ("workingPrice", Param::Decimal(working_price)),
            ("workingQuantity", Param::Decimal(intent.quantity)),
            ("workingTimeInForce", Param::text(GOOD_TILL_CANCEL)),
            ("pendingSide", Param::text(exit_side.as_str())),
            ("pendingQuantity", Param::Decimal(intent.quantity)),
            ("pendingPrice", Param::Decimal(bracket.take_profit_price)),
            ("pendingStopPrice", Param::Decimal(bracket.stop_loss_price)),
        ];
        if let Some(limit) = bracket.stop_limit_price() {
            params.push(("pendingStopLimitPrice", Param::Decimal(limit)));
            params.push(("pendingStopLimitTimeInForce", Param::text(STOP_LIMIT_TIME_IN_FORCE)));
        }
        self.build(&self.endpoints.otoco, params, timestamp_ms)
    }

    fn build(
        &self,
        url: &str,
        params: Vec<(&'static str, Param)>,
        timestamp_ms: i64,
    ) -> Result<RequestDescriptor> {
        let request = with_api_key(RequestDescriptor::post(url), &self.api_key);
        match &self.signer {
            Some(signer) => {
                let encoded: Vec<(&str, String)> =
                    params.iter().map(|(k, v)| (*k, v.to_text())).collect();
                let body = signer.signed_body(&encoded, timestamp_ms)?;
                Ok(request.payload(Payload::Form(body)))
            }
            None => {
                let body: Map<String, Value> = params
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.into_json()))
                    .collect();
                Ok(request.payload(Payload::Json(Value::Object(body))))
            }
        }
    }
}

enum Param {
    Text(String),
    Decimal(f64),
}

impl Param {
    fn text(value: impl Into<String>) -> Self {
        Param::Text(value.into())
    }

    fn to_text(&self) -> String {
        match self {
            Param::Text(s) => s.clone(),
            Param::Decimal(v) => format_decimal(*v),
        }
    }

    fn into_json(self) -> Value {
        match self {
            Param::Text(s) => Value::String(s),
            // Whole values go out as integers, matching `format_decimal`.
            Param::Decimal(v) if v.fract() == 0.0 && v.abs() < MAX_EXACT_INTEGER => {
                Value::from(v as i64)
            }
            Param::Decimal(v) => Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(format_decimal(v))),
        }
    }
}

// ─── Placement ────────────────────────────────────────────────────────────────

/// What a placed order produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderOutcome {
    /// A plain order without bracket legs.
    Single { order: OrderResponse },
    /// Market entry followed by its OCO exit.
    Bracketed {
        entry: OrderResponse,
        exit: OrderListResponse,
    },
    /// Limit entry and exit submitted together.
    Otoco { list: OrderListResponse },
}

impl OrderOutcome {
    /// Output items in emission order. A bracketed outcome yields the entry
    /// and then `{"ocoOrder": ...}`.
    pub fn into_items(self) -> Result<Vec<Value>> {
        Ok(match self {
            OrderOutcome::Single { order } => vec![serde_json::to_value(order)?],
            OrderOutcome::Bracketed { entry, exit } => vec![
                serde_json::to_value(entry)?,
                json!({ "ocoOrder": serde_json::to_value(exit)? }),
            ],
            OrderOutcome::Otoco { list } => vec![serde_json::to_value(list)?],
        })
    }
}

/// Turns an [`OrderIntent`] into one or two calls on the injected transport.
pub struct OrderPlacer {
    transport: Arc<dyn HttpTransport>,
    route: OrderRoute,
}

impl OrderPlacer {
    pub fn new(transport: Arc<dyn HttpTransport>, route: OrderRoute) -> Self {
        Self { transport, route }
    }

    pub fn route(&self) -> &OrderRoute {
        &self.route
    }

    /// Validate, then submit.
    ///
    /// - no bracket: one call to the order endpoint
    /// - MARKET + bracket: entry, then an OCO exit sized to the executed quantity
    /// - LIMIT + bracket: one OTOCO call
    ///
    /// A failed exit leg is returned as [`Error::ExitLegFailed`]; the filled
    /// entry is neither retried nor cancelled.
    pub async fn place(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        intent.validate()?;

        match (&intent.bracket, intent.order_type) {
            (None, _) => {
                let order = self.submit_entry(intent).await?;
                Ok(OrderOutcome::Single { order })
            }
            (Some(bracket), OrderType::Market) => self.market_then_oco(intent, bracket).await,
            (Some(bracket), OrderType::Limit) => self.otoco(intent, bracket).await,
            (Some(_), other) => Err(Error::Validation(format!(
                "bracket orders require a MARKET or LIMIT entry, got {other}"
            ))),
        }
    }

    async fn submit_entry(&self, intent: &OrderIntent) -> Result<OrderResponse> {
        let request = self.route.entry_request(intent, timestamp_ms())?;
        info!(
            symbol = %intent.normalized_symbol(),
            side = %intent.side,
            order_type = %intent.order_type,
            qty = intent.quantity,
            source = %self.route.source,
            "Submitting order"
        );
        let body = self.transport.send(&request).await?;
        let order = parse_order(body)?;
        info!(order_id = ?order.order_id, status = ?order.status, "Order accepted");
        Ok(order)
    }

    async fn market_then_oco(
        &self,
        intent: &OrderIntent,
        bracket: &BracketSpec,
    ) -> Result<OrderOutcome> {
        let entry = self.submit_entry(intent).await?;

        let Some(filled) = entry.filled_quantity() else {
            warn!(
                order_id = ?entry.order_id,
                status = ?entry.status,
                "Entry has no executed quantity, bracket exit not submitted"
            );
            return Err(Error::UnfilledEntry {
                entry: Box::new(entry),
            });
        };

        let exit_side = intent.side.opposite();
        info!(
            symbol = %intent.normalized_symbol(),
            side = %exit_side,
            qty = filled,
            take_profit = bracket.take_profit_price,
            stop_loss = bracket.stop_loss_price,
            "Entry filled, submitting OCO exit"
        );

        let exit = async {
            let request = self.route.oco_request(
                &intent.symbol,
                exit_side,
                filled,
                bracket,
                timestamp_ms(),
            )?;
            let body = self.transport.send(&request).await?;
            parse_order_list(body, false)
        }
        .await;

        match exit {
            Ok(exit) => {
                info!(order_list_id = exit.order_list_id, "OCO exit placed");
                Ok(OrderOutcome::Bracketed { entry, exit })
            }
            Err(e) => {
                error!(
                    order_id = ?entry.order_id,
                    error = %e,
                    "OCO exit failed; entry position is live and unhedged"
                );
                Err(Error::ExitLegFailed {
                    entry: Box::new(entry),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn otoco(&self, intent: &OrderIntent, bracket: &BracketSpec) -> Result<OrderOutcome> {
        let request = self.route.otoco_request(intent, bracket, timestamp_ms())?;
        info!(
            symbol = %intent.normalized_symbol(),
            side = %intent.side,
            qty = intent.quantity,
            source = %self.route.source,
            "Submitting OTOCO order"
        );
        let body = self.transport.send(&request).await?;
        let list = parse_order_list(body, true)?;
        info!(order_list_id = list.order_list_id, "OTOCO order placed");
        Ok(OrderOutcome::Otoco { list })
    }
}

fn parse_order(body: Value) -> Result<OrderResponse> {
    serde_json::from_value(body)
        .map_err(|e| Error::Mapping(format!("unexpected order response: {e}")))
}

fn parse_order_list(body: Value, require_symbol: bool) -> Result<OrderListResponse> {
    let list: OrderListResponse = serde_json::from_value(body)
        .map_err(|e| Error::Mapping(format!("unexpected order list response: {e}")))?;
    if require_symbol && list.symbol.is_none() {
        return Err(Error::Mapping(
            "OTOCO response is missing the top-level symbol".into(),
        ));
    }
    Ok(list)
}
