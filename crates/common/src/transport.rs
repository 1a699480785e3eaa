use async_trait::async_trait;
use serde_json::Value;

use crate::{RequestDescriptor, Result};

/// The one capability every operation needs: send a request, get JSON back.
///
/// `engine::ReqwestTransport` implements this against the network.
/// `paper::PaperTransport` implements it as an in-memory simulated exchange.
///
/// Implementations must map any non-2xx status to `Error::Upstream` and must
/// not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<Value>;
}
