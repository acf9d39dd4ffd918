use super::types::InventorySnapshot;
use crate::types::{Fill, Side, TradeId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// Per-call reconciliation counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub applied: usize,
    pub duplicates: usize,
    pub stale: usize,
}

/// Signed position and fee cost folded from recent fills.
///
/// Only fills newer than `now - lookback` are applied, each `trade_id` at most
/// once. Ids are forgotten once they fall out of the window, which is safe as
/// long as `now` does not move backwards.
#[derive(Clone, Debug)]
pub struct InventoryTracker {
    lookback: Duration,
    position: f64,
    fees_paid: f64,
    trades_count: u64,
    buy_volume: f64,
    sell_volume: f64,
    seen: HashMap<TradeId, DateTime<Utc>>,
}

impl InventoryTracker {
    /// Windows longer than chrono can represent saturate at `Duration::MAX`.
    pub fn new(lookback_secs: u64) -> Self {
        let lookback = i64::try_from(lookback_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            lookback,
            position: 0.0,
            fees_paid: 0.0,
            trades_count: 0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            seen: HashMap::new(),
        }
    }

    /// Start of the trailing window at `now`; also the `since` for fill queries.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn reconcile(&mut self, fills: &[Fill], now: DateTime<Utc>) -> ReconcileSummary {
        let cutoff = self.window_start(now);
        self.seen.retain(|_, ts| *ts > cutoff);

        let mut summary = ReconcileSummary::default();
        for fill in fills {
            if fill.timestamp <= cutoff {
                summary.stale += 1;
                continue;
            }
            if self.seen.contains_key(&fill.trade_id) {
                summary.duplicates += 1;
                continue;
            }
            self.seen.insert(fill.trade_id.clone(), fill.timestamp);
            self.apply(fill);
            summary.applied += 1;
        }

        if summary.duplicates > 0 || summary.stale > 0 {
            debug!(
                duplicates = summary.duplicates,
                stale = summary.stale,
                "skipped fills during reconciliation"
            );
        }
        summary
    }

    fn apply(&mut self, fill: &Fill) {
        let amount = fill.amount.abs();
        self.position += fill.signed_amount();
        match fill.side {
            Side::Buy => self.buy_volume += amount,
            Side::Sell => self.sell_volume += amount,
        }
        self.fees_paid += fill.fee.abs();
        self.trades_count += 1;
        info!(
            trade_id = %fill.trade_id,
            side = %fill.side,
            amount,
            price = fill.price,
            fee = fill.fee,
            position = self.position,
            "Trade executed"
        );
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            position: self.position,
            fees_paid: self.fees_paid,
            trades_count: self.trades_count,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
        }
    }
}
