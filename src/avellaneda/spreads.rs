use super::types::{QuoteContext, QuoteSet, SafetyBounds, StrategyParams};
use chrono::Utc;

pub fn reservation_price(mid: f64, q: f64, gamma: f64, sigma: f64, time_left: f64) -> f64 {
    let variance_horizon = (sigma * sigma) * time_left;
    mid - q * gamma * variance_horizon
}

/// Model spread as a fraction of price: `γσ²t + (2/γ)·ln(1 + γ/k)`.
pub fn optimal_spread(gamma: f64, sigma: f64, time_left: f64, kappa: f64) -> f64 {
    let risk_term = gamma * (sigma * sigma) * time_left;
    let liquidity_term = (2.0 / gamma) * (1.0 + gamma / kappa).ln();
    (risk_term + liquidity_term).max(0.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuoteComputation {
    /// Prices only; size is filled in by the position sizer.
    pub quotes: QuoteSet,
    pub context: QuoteContext,
}

/// Stateless Avellaneda-Stoikov pricer.
#[derive(Clone, Debug)]
pub struct QuoteEngine {
    params: StrategyParams,
    bounds: SafetyBounds,
}

impl QuoteEngine {
    pub fn new(params: StrategyParams, bounds: SafetyBounds) -> Self {
        Self { params, bounds }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn bounds(&self) -> &SafetyBounds {
        &self.bounds
    }

    pub fn time_remaining_now(&self) -> f64 {
        let now = Utc::now();
        let unix_secs = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
        self.params.time_remaining_at(unix_secs)
    }

    pub fn reservation_price(&self, mid: f64, inventory: f64, sigma: f64, time_remaining: f64) -> f64 {
        reservation_price(mid, inventory, self.params.gamma, sigma, time_remaining)
    }

    /// Model spread in absolute price units, floored at the configured minimum.
    pub fn optimal_spread(&self, mid: f64, sigma: f64, time_remaining: f64) -> f64 {
        let relative = optimal_spread(self.params.gamma, sigma, time_remaining, self.params.kappa);
        (relative * mid).max(self.bounds.min_spread)
    }

    /// Quotes at the current wall-clock position in the horizon cycle.
    pub fn quote(&self, mid: f64, inventory: f64, sigma: f64) -> QuoteComputation {
        self.quote_at(mid, inventory, sigma, self.time_remaining_now())
    }

    /// Builds the bid/ask pair. The max-spread cap is applied first (recentring
    /// on mid), then the non-crossing clamp. If the clamp widened a skewed pair
    /// past the cap, the leg farther from mid is pulled back in.
    pub fn quote_at(
        &self,
        mid: f64,
        inventory: f64,
        sigma: f64,
        time_remaining: f64,
    ) -> QuoteComputation {
        let reservation = self.reservation_price(mid, inventory, sigma, time_remaining);
        let raw_spread = self.optimal_spread(mid, sigma, time_remaining);
        let max_spread = mid * self.bounds.max_spread_pct;

        let half = raw_spread / 2.0;
        let mut bid = reservation - half;
        let mut ask = reservation + half;

        let capped = ask - bid > max_spread;
        if capped {
            bid = mid - max_spread / 2.0;
            ask = mid + max_spread / 2.0;
        }

        let bid_limit = mid * (1.0 - self.bounds.non_crossing_epsilon);
        let ask_limit = mid * (1.0 + self.bounds.non_crossing_epsilon);
        let clamped = bid > bid_limit || ask < ask_limit;
        bid = bid.min(bid_limit);
        ask = ask.max(ask_limit);

        if ask - bid > max_spread {
            if ask - mid > mid - bid {
                ask = bid + max_spread;
            } else {
                bid = ask - max_spread;
            }
        }

        QuoteComputation {
            quotes: QuoteSet::new(bid, ask, 0.0),
            context: QuoteContext {
                time_remaining,
                reservation_price: reservation,
                raw_spread,
                effective_spread: ask - bid,
                capped,
                clamped,
            },
        }
    }
}
