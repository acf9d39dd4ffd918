use ringbuffer::{AllocRingBuffer, RingBuffer, RingBufferExt, RingBufferRead, RingBufferWrite};
use statrs::statistics::Statistics;
use tracing::warn;

const MIN_OBSERVATIONS: usize = 3;

/// Realized volatility over a bounded window of mid prices.
///
/// The estimate is the sample standard deviation of log returns scaled by
/// `sqrt(annualization_ticks)` and floored. With fewer than three
/// observations the previous (or seed) estimate is kept.
#[derive(Clone, Debug)]
pub struct VolEstimator {
    lookback: usize,
    floor: f64,
    annualization_ticks: f64,
    history: AllocRingBuffer<f64>,
    sigma: f64,
}

impl VolEstimator {
    pub fn new(lookback: usize, initial_sigma: f64, floor: f64, annualization_ticks: f64) -> Self {
        let lookback = lookback.max(MIN_OBSERVATIONS);
        let capacity = lookback.next_power_of_two();
        Self {
            lookback,
            floor,
            annualization_ticks,
            history: AllocRingBuffer::with_capacity(capacity),
            sigma: initial_sigma,
        }
    }

    pub fn observe(&mut self, mid: f64) {
        if !(mid.is_finite() && mid > 0.0) {
            warn!(mid, "ignoring non-positive mid price in volatility window");
            return;
        }
        self.history.push(mid);
        while self.history.len() > self.lookback {
            let _ = self.history.dequeue();
        }
        if self.history.len() < MIN_OBSERVATIONS {
            return;
        }

        let prices: Vec<f64> = self.history.iter().copied().collect();
        let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let stdev = returns.iter().std_dev();
        if stdev.is_finite() {
            self.sigma = (stdev * self.annualization_ticks.sqrt()).max(self.floor);
        }
    }

    pub fn estimate(&self) -> f64 {
        self.sigma
    }

    pub fn observations(&self) -> usize {
        self.history.len()
    }

    pub fn is_warmed_up(&self) -> bool {
        self.history.len() >= MIN_OBSERVATIONS
    }
}
