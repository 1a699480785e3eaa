use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use common::{
    normalize_symbol, Error, HttpTransport, OrderSide, OrderType, RequestDescriptor, Result,
};

/// Simulated exchange for paper trading and tests.
///
/// Answers order, OCO, OTOCO, ticker and ping calls with Binance-shaped
/// bodies. Market orders fill at the latest known price with configurable
/// slippage; everything else rests as `NEW`. No real orders are ever sent.
///
/// Every request is recorded. Scripted responses queued with
/// [`PaperTransport::enqueue`] are returned first, in order.
pub struct PaperTransport {
    /// Latest known price per symbol, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Slippage in basis points applied to market fills.
    slippage_bps: f64,
    requests: Arc<RwLock<Vec<RequestDescriptor>>>,
    scripted: Mutex<VecDeque<Result<Value>>>,
    next_id: AtomicI64,
}

impl PaperTransport {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps = slippage_bps, "PaperTransport initialized");
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
            requests: Arc::new(RwLock::new(Vec::new())),
            scripted: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Update the latest price for a symbol.
    pub async fn update_price(&self, symbol: &str, price: f64) {
        self.prices
            .write()
            .await
            .insert(normalize_symbol(symbol), price);
    }

    /// Queue a canned response for the next call.
    pub async fn enqueue(&self, response: Result<Value>) {
        self.scripted.lock().await.push_back(response);
    }

    /// Every request received so far, in order.
    pub async fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.read().await.clone()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn fill_price(&self, mid: f64, side: OrderSide) -> f64 {
        // Buys pay more, sells receive less.
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    async fn price_of(&self, symbol: &str) -> Result<f64> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| rejected(-1121, &format!("No paper price for symbol '{symbol}'")))
    }

    async fn simulate(&self, request: &RequestDescriptor) -> Result<Value> {
        let path = request.path();
        if path.ends_with("/orderList/otoco") {
            self.otoco(request)
        } else if path.ends_with("/order/oco") {
            self.oco(request)
        } else if path.ends_with("/order") {
            self.order(request).await
        } else if path.ends_with("/ticker/price") {
            self.ticker(request).await
        } else if path.ends_with("/ping") {
            Ok(json!({}))
        } else {
            Err(Error::Upstream {
                status: 404,
                body: format!("paper exchange has no endpoint {path}"),
            })
        }
    }

    async fn order(&self, request: &RequestDescriptor) -> Result<Value> {
        let symbol = required(request, "symbol").map(|s| normalize_symbol(&s))?;
        let side: OrderSide = required(request, "side")?.parse()?;
        let order_type: OrderType = required(request, "type")?.parse()?;
        let quantity = decimal(request, "quantity")?;
        let order_id = self.next_id();

        let (status, executed, price) = if order_type == OrderType::Market {
            let mid = self.price_of(&symbol).await?;
            (
                "FILLED",
                quantity,
                self.fill_price(mid, side),
            )
        } else {
            ("NEW", 0.0, decimal(request, "price").unwrap_or(0.0))
        };

        debug!(
            symbol = %symbol,
            side = %side,
            order_type = %order_type,
            qty = quantity,
            status = status,
            "Paper order simulated"
        );

        let mut body = json!({
            "symbol": symbol,
            "orderId": order_id,
            "orderListId": -1,
            "clientOrderId": client_order_id(),
            "transactTime": Utc::now().timestamp_millis(),
            "price": fixed(if order_type == OrderType::Market { 0.0 } else { price }),
            "origQty": fixed(quantity),
            "executedQty": fixed(executed),
            "status": status,
            "timeInForce": request.param("timeInForce").unwrap_or_else(|| "GTC".into()),
            "type": order_type.as_str(),
            "side": side.as_str(),
        });
        if status == "FILLED" {
            body["fills"] = json!([{ "price": fixed(price), "qty": fixed(executed) }]);
        }
        Ok(body)
    }

    fn oco(&self, request: &RequestDescriptor) -> Result<Value> {
        let symbol = required(request, "symbol").map(|s| normalize_symbol(&s))?;
        required(request, "side")?.parse::<OrderSide>()?;
        decimal(request, "quantity")?;
        decimal(request, "price")?;
        decimal(request, "stopPrice")?;
        Ok(self.order_list(&symbol, "OCO", 2))
    }

    fn otoco(&self, request: &RequestDescriptor) -> Result<Value> {
        let symbol = required(request, "symbol").map(|s| normalize_symbol(&s))?;
        required(request, "workingSide")?.parse::<OrderSide>()?;
        required(request, "pendingSide")?.parse::<OrderSide>()?;
        decimal(request, "workingPrice")?;
        decimal(request, "workingQuantity")?;
        decimal(request, "pendingPrice")?;
        decimal(request, "pendingStopPrice")?;
        Ok(self.order_list(&symbol, "OTO", 3))
    }

    fn order_list(&self, symbol: &str, contingency: &str, legs: usize) -> Value {
        let orders: Vec<Value> = (0..legs)
            .map(|_| {
                json!({
                    "symbol": symbol,
                    "orderId": self.next_id(),
                    "clientOrderId": client_order_id(),
                })
            })
            .collect();
        json!({
            "orderListId": self.next_id(),
            "contingencyType": contingency,
            "listStatusType": "EXEC_STARTED",
            "listOrderStatus": "EXECUTING",
            "listClientOrderId": client_order_id(),
            "transactionTime": Utc::now().timestamp_millis(),
            "symbol": symbol,
            "orders": orders,
        })
    }

    async fn ticker(&self, request: &RequestDescriptor) -> Result<Value> {
        if let Some(symbol) = request.param("symbol") {
            let symbol = normalize_symbol(&symbol);
            let price = self.price_of(&symbol).await?;
            return Ok(json!({ "symbol": symbol, "price": fixed(price) }));
        }
        let list = required(request, "symbols")?;
        let symbols: Vec<String> = serde_json::from_str(&list)
            .map_err(|_| rejected(-1100, "Illegal characters found in parameter 'symbols'"))?;
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let price = self.price_of(&symbol).await?;
            out.push(json!({ "symbol": symbol, "price": fixed(price) }));
        }
        Ok(Value::Array(out))
    }
}

#[async_trait]
impl HttpTransport for PaperTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Value> {
        self.requests.write().await.push(request.clone());
        if let Some(scripted) = self.scripted.lock().await.pop_front() {
            return scripted;
        }
        self.simulate(request).await
    }
}

fn required(request: &RequestDescriptor, key: &str) -> Result<String> {
    request
        .param(key)
        .ok_or_else(|| rejected(-1102, &format!("Mandatory parameter '{key}' was not sent")))
}

fn decimal(request: &RequestDescriptor, key: &str) -> Result<f64> {
    required(request, key)?
        .parse::<f64>()
        .map_err(|_| rejected(-1100, &format!("Illegal characters found in parameter '{key}'")))
}

/// Binance-style 400 rejection.
fn rejected(code: i64, msg: &str) -> Error {
    Error::Upstream {
        status: 400,
        body: json!({ "code": code, "msg": msg }).to_string(),
    }
}

fn fixed(value: f64) -> String {
    format!("{value:.8}")
}

fn client_order_id() -> String {
    format!("paper-{}", uuid::Uuid::new_v4().simple())
}
