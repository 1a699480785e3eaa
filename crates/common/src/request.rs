use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// HTTP verbs used against Binance and the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// What travels with the request. Exactly one shape per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Empty,
    /// Appended to the URL as a query string.
    Query(Vec<(String, String)>),
    /// JSON body (proxy and custom transports).
    Json(Value),
    /// Pre-encoded `application/x-www-form-urlencoded` body. For signed
    /// requests this is the exact string the signature covers, plus
    /// `&signature=...`.
    Form(String),
}

/// A fully-assembled outbound call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            payload: Payload::Empty,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            payload: Payload::Empty,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Path component of the URL (`/api/v3/order` for
    /// `https://api.binance.com/api/v3/order`). An unparsable URL is
    /// returned whole.
    pub fn path(&self) -> String {
        url::Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.url.clone())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Look up a parameter regardless of payload shape. JSON numbers are
    /// rendered with their natural decimal form.
    pub fn param(&self, key: &str) -> Option<String> {
        match &self.payload {
            Payload::Empty => None,
            Payload::Query(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            Payload::Json(body) => body.get(key).map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if n.is_f64() => crate::format_decimal(f),
                    _ => n.to_string(),
                },
                other => other.to_string(),
            }),
            Payload::Form(body) => url::form_urlencoded::parse(body.as_bytes())
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_strips_scheme_host_and_query() {
        let req = RequestDescriptor::get("https://api.binance.com/api/v3/klines?symbol=BTCUSDT");
        assert_eq!(req.path(), "/api/v3/klines");

        let bare = RequestDescriptor::get("http://api:8000");
        assert_eq!(bare.path(), "/");

        let relative = RequestDescriptor::get("not a url");
        assert_eq!(relative.path(), "not a url");
    }

    #[test]
    fn param_reads_every_payload_shape() {
        let form = RequestDescriptor::post("https://x/api/v3/order")
            .payload(Payload::Form("symbol=BTCUSDT&quantity=0.1&signature=ab".into()));
        assert_eq!(form.param("quantity").as_deref(), Some("0.1"));

        let body = RequestDescriptor::post("http://api:8000/api/binance/order")
            .payload(Payload::Json(json!({ "price": 55000.0, "side": "SELL" })));
        assert_eq!(body.param("price").as_deref(), Some("55000"));
        assert_eq!(body.param("side").as_deref(), Some("SELL"));

        let query = RequestDescriptor::get("https://x/klines")
            .payload(Payload::Query(vec![("limit".into(), "50".into())]));
        assert_eq!(query.param("limit").as_deref(), Some("50"));
        assert_eq!(query.param("missing"), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = RequestDescriptor::get("https://x/").header("X-MBX-APIKEY", "key");
        assert_eq!(req.header_value("x-mbx-apikey"), Some("key"));
    }
}
