pub mod batch;
pub mod config;
pub mod error;
pub mod request;
pub mod transport;
pub mod types;

pub use batch::{decode_item, run_batch, BatchError, ErrorRecord, FailurePolicy, ItemOutcome};
pub use config::{Config, TradingMode};
pub use error::{Error, Result};
pub use request::{HttpMethod, Payload, RequestDescriptor};
pub use transport::HttpTransport;
pub use types::*;
