#![allow(clippy::too_many_arguments)]

pub mod avellaneda;
pub mod errors;
pub mod exchange;
pub(crate) mod timings;
pub mod types;

pub use avellaneda::{StrategyConfig, StrategyMetrics, StrategyScheduler};
pub use errors::{ExchangeError, ExchangeResult};
pub use exchange::{ExchangeConnector, PaperExchange};
pub use types::{
    Fill, InstrumentConstraints, OrderId, OrderRecord, OrderStatus, Side, TopOfBook, TradeId,
};
