use super::config::StrategyConfig;
use crate::types::InstrumentConstraints;

/// Order quantity from minimum notional, exchange minimum and inventory risk.
///
/// Two-tier throttle only: size is scaled down once inventory notional passes
/// the threshold, but the max-inventory level is never enforced as a hard stop.
#[derive(Clone, Debug)]
pub struct PositionSizer {
    min_notional: f64,
    max_inventory_notional: f64,
    throttle_threshold: f64,
    throttle_factor: f64,
}

impl PositionSizer {
    pub fn new(
        min_notional: f64,
        max_inventory_notional: f64,
        throttle_threshold: f64,
        throttle_factor: f64,
    ) -> Self {
        Self {
            min_notional,
            max_inventory_notional,
            throttle_threshold,
            throttle_factor,
        }
    }

    pub fn from_config(cfg: &StrategyConfig) -> Self {
        Self::new(
            cfg.min_order_notional,
            cfg.max_inventory_notional,
            cfg.inventory_throttle_threshold,
            cfg.inventory_throttle_factor,
        )
    }

    pub fn is_throttled(&self, price: f64, inventory: f64) -> bool {
        (inventory * price).abs() > self.max_inventory_notional * self.throttle_threshold
    }

    pub fn size(&self, price: f64, inventory: f64, constraints: &InstrumentConstraints) -> f64 {
        let min_quantity = constraints.min_quantity.max(0.0);
        let notional_quantity = if price.is_finite() && price > 0.0 {
            self.min_notional / price
        } else {
            0.0
        };

        let mut size = notional_quantity.max(min_quantity);
        if self.is_throttled(price, inventory) {
            size *= self.throttle_factor;
        }

        let rounded = constraints.round_quantity(size);
        if rounded.is_finite() {
            rounded.max(min_quantity)
        } else {
            min_quantity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_notional_drives_size() {
        let sizer = PositionSizer::new(10.0, 100.0, 0.5, 0.5);
        let constraints = InstrumentConstraints::new(1.0, 4, 4);
        assert!((sizer.size(0.5, 0.0, &constraints) - 20.0).abs() < 1e-12);
        // 10 / 3 rounded to four decimals.
        assert!((sizer.size(3.0, 0.0, &constraints) - 3.3333).abs() < 1e-12);
    }

    #[test]
    fn test_inventory_throttle_halves_size() {
        let sizer = PositionSizer::new(10.0, 100.0, 0.5, 0.5);
        let constraints = InstrumentConstraints::new(1.0, 4, 4);
        // |150 * 0.5| = 75 > 50
        assert!(sizer.is_throttled(0.5, 150.0));
        assert!(sizer.is_throttled(0.5, -150.0));
        assert!((sizer.size(0.5, 150.0, &constraints) - 10.0).abs() < 1e-12);
        // Exactly at the threshold is not throttled.
        assert!(!sizer.is_throttled(0.5, 100.0));
    }

    #[test]
    fn test_rounding_never_goes_below_minimum() {
        let sizer = PositionSizer::new(0.0, 200.0, 0.5, 0.5);
        let constraints = InstrumentConstraints::new(0.001, 3, 2);
        assert_eq!(sizer.size(3000.0, 0.0, &constraints), 0.001);
        // Throttled 0.0005 rounds to zero or 0.001, both end at the minimum.
        assert_eq!(sizer.size(3000.0, 1.0, &constraints), 0.001);
    }

    #[test]
    fn test_zero_precision_and_degenerate_prices() {
        let sizer = PositionSizer::new(10.0, 100.0, 0.5, 0.5);
        let whole = InstrumentConstraints::new(0.001, 0, 0);
        for price in [0.0, -1.0, f64::NAN, 1e9, 2500.0] {
            for inventory in [-1e6, 0.0, 1e6] {
                assert!(sizer.size(price, inventory, &whole) >= 0.001);
            }
        }
        assert_eq!(sizer.size(4.0, 0.0, &whole), 3.0);
    }
}
