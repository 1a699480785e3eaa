use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use common::{Error, HttpTransport, Payload, RequestDescriptor, Result};

/// Analysis endpoint of the proxy service.
pub const DEFAULT_ANALYZE_URL: &str = "http://api:8000/api/ingest/analyze";

/// Smallest period any indicator accepts.
pub const MIN_PERIOD: u32 = 2;

/// Indicator settings sent alongside the market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParameters {
    pub rsi_period: u32,
    pub macd_fast: u32,
    pub macd_slow: u32,
    pub macd_signal: u32,
    pub sma_enabled: bool,
    pub ema_enabled: bool,
}

impl Default for IndicatorParameters {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            sma_enabled: true,
            ema_enabled: true,
        }
    }
}

impl IndicatorParameters {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
        ];
        for (name, value) in periods {
            if value < MIN_PERIOD {
                return Err(Error::Validation(format!(
                    "{name} must be at least {MIN_PERIOD}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Posts market-data items to the analysis endpoint and returns its reply.
pub struct IndicatorClient {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    parameters: IndicatorParameters,
}

impl IndicatorClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: impl Into<String>,
        parameters: IndicatorParameters,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.into(),
            parameters,
        }
    }

    /// `POST {api_url}` with `{ "data": item, "parameters": {...} }`.
    pub fn request(&self, item: Value) -> Result<RequestDescriptor> {
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("indicator API URL is empty".into()));
        }
        self.parameters.validate()?;
        let body = json!({
            "data": item,
            "parameters": serde_json::to_value(self.parameters)?,
        });
        Ok(RequestDescriptor::post(self.api_url.clone()).payload(Payload::Json(body)))
    }

    pub async fn analyze(&self, item: Value) -> Result<Value> {
        let request = self.request(item)?;
        debug!(url = %request.url, "Requesting indicator analysis");
        let reply = self.transport.send(&request).await?;
        info!(
            rsi_period = self.parameters.rsi_period,
            macd_fast = self.parameters.macd_fast,
            macd_slow = self.parameters.macd_slow,
            "Indicators computed"
        );
        Ok(reply)
    }
}
