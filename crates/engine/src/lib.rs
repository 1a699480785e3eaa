pub mod binance;
pub mod indicators;
pub mod klines;
pub mod order;
pub mod ticker;

pub use binance::{ping, ReqwestTransport, Signer};
pub use indicators::{IndicatorClient, IndicatorParameters};
pub use klines::{KlineFetcher, KlineQuery, KlineShape, MarketReport};
pub use order::{CustomEndpoint, OrderOutcome, OrderPlacer, OrderRoute};
pub use ticker::{TickerFetcher, TickerQuery, TickerReport};
