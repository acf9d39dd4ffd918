use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exchange-assigned order identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange-assigned identifier of an executed trade.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(String);

impl TradeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TradeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Quote leg label used in logs.
    pub fn leg(self) -> &'static str {
        match self {
            Side::Buy => "bid",
            Side::Sell => "ask",
        }
    }

    /// Sign applied to a fill amount when folding it into the position.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Open,
    Failed,
}

/// Resting limit order as tracked by the lifecycle manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
}

impl OrderRecord {
    pub fn new(id: OrderId, side: Side, price: f64, quantity: f64, status: OrderStatus) -> Self {
        Self {
            id,
            side,
            price,
            quantity,
            status,
        }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Executed trade reported by the exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Fill {
    pub trade_id: TradeId,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Signed base-asset change caused by this fill.
    pub fn signed_amount(&self) -> f64 {
        self.side.sign() * self.amount.abs()
    }
}

/// Raw top of book; either side may be absent on an empty or one-sided book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopOfBook {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

impl TopOfBook {
    pub fn new(best_bid: f64, best_ask: f64) -> Self {
        Self {
            best_bid: Some(best_bid),
            best_ask: Some(best_ask),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Exchange trading constraints for one instrument.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConstraints {
    pub min_quantity: f64,
    pub quantity_precision: u32,
    pub price_precision: u32,
}

impl InstrumentConstraints {
    pub fn new(min_quantity: f64, quantity_precision: u32, price_precision: u32) -> Self {
        Self {
            min_quantity,
            quantity_precision,
            price_precision,
        }
    }

    pub fn round_quantity(&self, quantity: f64) -> f64 {
        let scale = decimal_scale(self.quantity_precision);
        (quantity * scale).round() / scale
    }

    /// Rounds a bid down so rounding never moves it closer to the mid.
    /// Prices already on the tick grid are left where they are.
    pub fn round_bid_price(&self, price: f64) -> f64 {
        let scale = decimal_scale(self.price_precision);
        (price * scale + GRID_EPSILON).floor() / scale
    }

    /// Rounds an ask up so rounding never moves it closer to the mid.
    pub fn round_ask_price(&self, price: f64) -> f64 {
        let scale = decimal_scale(self.price_precision);
        (price * scale - GRID_EPSILON).ceil() / scale
    }
}

// Absorbs float error in `price * scale` for prices that sit on a tick.
const GRID_EPSILON: f64 = 1e-9;

fn decimal_scale(precision: u32) -> f64 {
    10_f64.powi(precision.min(18) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_signed_amount() {
        let mut fill = Fill {
            trade_id: TradeId::new("t1"),
            side: Side::Buy,
            amount: 2.5,
            price: 100.0,
            fee: 0.01,
            timestamp: Utc::now(),
        };
        assert_eq!(fill.signed_amount(), 2.5);
        fill.side = Side::Sell;
        assert_eq!(fill.signed_amount(), -2.5);
    }

    #[test]
    fn test_quantity_rounding() {
        let constraints = InstrumentConstraints::new(0.001, 3, 2);
        assert!((constraints.round_quantity(0.12345) - 0.123).abs() < 1e-12);
        assert!((constraints.round_quantity(0.1236) - 0.124).abs() < 1e-12);

        let whole = InstrumentConstraints::new(1.0, 0, 2);
        assert_eq!(whole.round_quantity(2.4), 2.0);
    }

    #[test]
    fn test_price_rounding_keeps_sides_apart() {
        let constraints = InstrumentConstraints::new(0.001, 3, 2);
        assert!((constraints.round_bid_price(99.956) - 99.95).abs() < 1e-9);
        assert!((constraints.round_ask_price(100.041) - 100.05).abs() < 1e-9);
    }

    #[test]
    fn test_on_grid_prices_are_unchanged() {
        let constraints = InstrumentConstraints::new(0.001, 3, 2);
        // 0.29 * 100 and 4.35 * 100 land just below the integer in f64.
        assert!((constraints.round_bid_price(0.29) - 0.29).abs() < 1e-12);
        assert!((constraints.round_bid_price(4.35) - 4.35).abs() < 1e-12);
        // 1.1 * 100 lands just above it.
        assert!((constraints.round_ask_price(1.1) - 1.1).abs() < 1e-12);
        assert!((constraints.round_ask_price(0.29) - 0.29).abs() < 1e-12);
    }

    #[test]
    fn test_side_labels() {
        assert_eq!(Side::Buy.leg(), "bid");
        assert_eq!(Side::Sell.leg(), "ask");
        assert_eq!(Side::Sell.to_string(), "sell");
    }
}
