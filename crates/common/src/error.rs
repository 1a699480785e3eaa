use thiserror::Error;

use crate::OrderResponse;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-2xx response from Binance or the proxy.
    #[error("Request failed with status code {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream payload did not have the expected shape.
    #[error("Response mapping error: {0}")]
    Mapping(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A market entry came back without a usable executed quantity, so the
    /// bracket exit was not submitted.
    #[error(
        "Entry order {} reported no executed quantity (status {}); bracket exit not submitted",
        order_ref(.entry),
        order_status(.entry)
    )]
    UnfilledEntry { entry: Box<OrderResponse> },

    /// The entry filled but the exit leg failed. The entry position is live
    /// and unhedged.
    #[error("Bracket exit failed after entry order {} filled: {source}", order_ref(.entry))]
    ExitLegFailed {
        entry: Box<OrderResponse>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// HTTP status of the failed upstream call, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::ExitLegFailed { source, .. } => source.status(),
            _ => None,
        }
    }

    /// The entry left open by a failed bracket exit.
    pub fn filled_entry(&self) -> Option<&OrderResponse> {
        match self {
            Error::ExitLegFailed { entry, .. } => Some(entry.as_ref()),
            _ => None,
        }
    }

    /// True for failures raised before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

fn order_ref(entry: &OrderResponse) -> String {
    entry
        .order_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn order_status(entry: &OrderResponse) -> &str {
    entry.status.as_deref().unwrap_or("unknown")
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
