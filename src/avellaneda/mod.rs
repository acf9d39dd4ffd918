//! Avellaneda-Stoikov market making core.
//!
//! `StrategyScheduler` drives the loop and owns the building blocks: configuration,
//! volatility estimation, spread optimisation, position sizing, inventory
//! reconciliation, market-data validation and order lifecycle management.

pub mod config;
pub mod execution;
pub mod inventory;
pub mod market_data;
pub mod sizing;
pub mod spreads;
pub mod strategy;
pub mod types;
pub mod volatility;

pub use config::StrategyConfig;
pub use execution::OrderLifecycleManager;
pub use inventory::{InventoryTracker, ReconcileSummary};
pub use market_data::{MarketDataState, MarketSnapshot};
pub use sizing::PositionSizer;
pub use spreads::{QuoteComputation, QuoteEngine};
pub use strategy::{SchedulerState, StrategyScheduler};
pub use types::{
    CancelReport, InventorySnapshot, LegResult, QuoteContext, QuoteSet, ReplaceOutcome,
    SafetyBounds, StrategyMetrics, StrategyParams, TickOutcome, TickReport,
};
pub use volatility::VolEstimator;
