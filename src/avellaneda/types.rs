use crate::avellaneda::market_data::MarketSnapshot;
use crate::types::OrderRecord;
use serde::Serialize;

/// Core pricing parameters derived from configuration.
#[derive(Clone, Debug)]
pub struct StrategyParams {
    pub gamma: f64,
    pub kappa: f64,
    pub time_horizon: f64,
    pub cycle_seconds: f64,
    pub min_time_remaining: f64,
}

impl StrategyParams {
    pub fn new(gamma: f64, kappa: f64, time_horizon: f64) -> Self {
        Self {
            gamma,
            kappa,
            time_horizon,
            cycle_seconds: 3600.0,
            min_time_remaining: 0.01,
        }
    }

    /// Fraction of the horizon left in the current cycle at `unix_secs`:
    /// `T - (now mod cycle) / cycle`, floored at `min_time_remaining`.
    pub fn time_remaining_at(&self, unix_secs: f64) -> f64 {
        let elapsed = unix_secs.rem_euclid(self.cycle_seconds) / self.cycle_seconds;
        (self.time_horizon - elapsed).max(self.min_time_remaining)
    }
}

/// Spread limits applied on top of the model spread.
#[derive(Clone, Debug)]
pub struct SafetyBounds {
    /// Absolute price units.
    pub min_spread: f64,
    /// Fraction of mid.
    pub max_spread_pct: f64,
    /// Minimum distance of each quote from mid, as a fraction of mid.
    pub non_crossing_epsilon: f64,
}

/// Bid/ask pair for one tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuoteSet {
    pub bid_price: f64,
    pub ask_price: f64,
    pub size: f64,
}

impl QuoteSet {
    pub fn new(bid_price: f64, ask_price: f64, size: f64) -> Self {
        Self {
            bid_price,
            ask_price,
            size,
        }
    }

    pub fn spread(&self) -> f64 {
        self.ask_price - self.bid_price
    }

    pub fn spread_bps(&self, mid: f64) -> f64 {
        spread_to_bps(self.spread(), mid)
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }
}

pub fn spread_to_bps(spread: f64, mid: f64) -> f64 {
    if mid.abs() <= f64::EPSILON {
        return 0.0;
    }
    (spread / mid) * 10_000.0
}

/// Intermediate values of a quote computation, for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuoteContext {
    pub time_remaining: f64,
    pub reservation_price: f64,
    /// Model spread before bounds, absolute price units.
    pub raw_spread: f64,
    pub effective_spread: f64,
    pub capped: bool,
    pub clamped: bool,
}

/// Inventory view exposed to the scheduler and status reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InventorySnapshot {
    pub position: f64,
    pub fees_paid: f64,
    pub trades_count: u64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

impl InventorySnapshot {
    pub fn notional(&self, price: f64) -> f64 {
        self.position * price
    }
}

/// Outcome of one placement attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum LegResult {
    Placed(OrderRecord),
    Failed(String),
}

impl LegResult {
    pub fn is_placed(&self) -> bool {
        matches!(self, LegResult::Placed(_))
    }

    pub fn order(&self) -> Option<&OrderRecord> {
        match self {
            LegResult::Placed(order) => Some(order),
            LegResult::Failed(_) => None,
        }
    }
}

/// Result of a best-effort cancel sweep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CancelReport {
    pub cancelled: usize,
    pub failed: usize,
    /// The open-order listing failed; only orders this process placed, or
    /// earlier failed to cancel, were attempted.
    pub listing_failed: bool,
}

impl CancelReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.listing_failed
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReplaceOutcome {
    pub cancel: CancelReport,
    pub bid: LegResult,
    pub ask: LegResult,
}

/// Everything computed during a quoting tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub snapshot: MarketSnapshot,
    pub sigma: f64,
    pub inventory: InventorySnapshot,
    pub quotes: QuoteSet,
    pub context: QuoteContext,
    pub available_balance: Option<f64>,
    pub outcome: ReplaceOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Quoted(Box<TickReport>),
    Skipped(&'static str),
}

/// Aggregated runtime metrics for monitoring.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StrategyMetrics {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub errors: u64,
    pub bids_placed: u64,
    pub asks_placed: u64,
    pub failed_legs: u64,
    pub cancel_failures: u64,
    pub trades_count: u64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub fees_paid: f64,
    pub position: f64,
    pub last_tick_latency_ms: Option<f64>,
    pub last_sigma: Option<f64>,
    pub last_reservation_price: Option<f64>,
    pub last_spread_bps: Option<f64>,
}
