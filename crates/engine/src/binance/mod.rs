pub mod rest;
pub mod signing;

pub use rest::{ReqwestTransport, REQUEST_TIMEOUT};
pub use signing::{timestamp_ms, Signer};

use serde_json::Value;
use tracing::info;

use common::{Config, HttpTransport, RequestDescriptor, Result};

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// `GET {base}{apiPath}ping` with the API-key header. Succeeds when the
/// configured base URL and path answer.
pub async fn ping(transport: &dyn HttpTransport, cfg: &Config) -> Result<Value> {
    let request = ping_request(cfg);
    let body = transport.send(&request).await?;
    info!(url = %request.url, "Credential ping succeeded");
    Ok(body)
}

pub fn ping_request(cfg: &Config) -> RequestDescriptor {
    let request = RequestDescriptor::get(format!("{}{}ping", cfg.base_url, cfg.api_path));
    with_api_key(request, &cfg.api_key)
}

/// Attach the API-key header when a key is configured.
pub(crate) fn with_api_key(request: RequestDescriptor, api_key: &str) -> RequestDescriptor {
    if api_key.is_empty() {
        request
    } else {
        request.header(API_KEY_HEADER, api_key)
    }
}
