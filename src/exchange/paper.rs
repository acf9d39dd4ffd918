//! In-memory exchange used for tests and paper trading.
//!
//! Books can be scripted tick by tick or driven by a random walk. Resting
//! orders are filled in full once a later book trades through them; there is
//! no queue or partial-fill modelling. Fills are kept for one hour.

use std::time::Duration;

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::{sync::Mutex, time::sleep};
use tracing::debug;

use super::connector::ExchangeConnector;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::types::{
    Fill, InstrumentConstraints, OrderId, OrderRecord, OrderStatus, Side, TopOfBook, TradeId,
};

/// Connector operations that can be made to fail on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaperOp {
    TopOfBook,
    ListOpenOrders,
    CancelOrder,
    PlaceBid,
    PlaceAsk,
    RecentFills,
    Balance,
    SetLeverage,
    SetPositionMode,
    Constraints,
}

/// Counters of calls the paper venue has served.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaperCalls {
    pub book_fetches: u32,
    pub cancels: u32,
    pub placements: u32,
    pub leverage: Option<u32>,
    pub hedged_mode: Option<bool>,
}

const FILL_RETENTION_SECS: i64 = 3600;

#[derive(Debug)]
struct PaperState {
    book: TopOfBook,
    scripted_books: VecDeque<TopOfBook>,
    random_walk_bps: Option<f64>,
    open_orders: Vec<OrderRecord>,
    fills: Vec<Fill>,
    balances: HashMap<String, f64>,
    constraints: InstrumentConstraints,
    fee_rate: f64,
    failures: HashMap<PaperOp, u32>,
    next_order_id: u64,
    next_trade_id: u64,
    calls: PaperCalls,
}

impl PaperState {
    /// Consumes one scheduled failure for `op`, if any.
    fn take_failure(&mut self, op: PaperOp) -> ExchangeResult<()> {
        match self.failures.get_mut(&op) {
            Some(0) | None => Ok(()),
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(ExchangeError::Network(format!("injected {:?} failure", op)))
            }
        }
    }

    fn advance_book(&mut self) {
        if let Some(next) = self.scripted_books.pop_front() {
            self.book = next;
        } else if let Some(step_bps) = self.random_walk_bps {
            if let (Some(bid), Some(ask)) = (self.book.best_bid, self.book.best_ask) {
                let shock = rand::thread_rng().gen_range(-1.0..=1.0) * step_bps / 10_000.0;
                let factor = 1.0 + shock;
                self.book = TopOfBook::new(bid * factor, ask * factor);
            }
        }
        self.fill_crossed_orders();
        self.prune_fills(Utc::now());
    }

    fn prune_fills(&mut self, now: DateTime<Utc>) {
        let cutoff = now - TimeDelta::seconds(FILL_RETENTION_SECS);
        self.fills.retain(|fill| fill.timestamp >= cutoff);
    }

    fn fill_crossed_orders(&mut self) {
        let (Some(best_bid), Some(best_ask)) = (self.book.best_bid, self.book.best_ask) else {
            return;
        };
        let mut resting = Vec::with_capacity(self.open_orders.len());
        for order in self.open_orders.drain(..) {
            let crossed = match order.side {
                Side::Buy => best_ask <= order.price,
                Side::Sell => best_bid >= order.price,
            };
            if crossed {
                self.next_trade_id += 1;
                debug!(order_id = %order.id, side = %order.side, price = order.price, "paper fill");
                self.fills.push(Fill {
                    trade_id: TradeId::new(format!("paper-trade-{}", self.next_trade_id)),
                    side: order.side,
                    amount: order.quantity,
                    price: order.price,
                    fee: order.notional() * self.fee_rate,
                    timestamp: Utc::now(),
                });
            } else {
                resting.push(order);
            }
        }
        self.open_orders = resting;
    }
}

/// Paper venue for a single instrument.
#[derive(Debug)]
pub struct PaperExchange {
    instrument: String,
    book_latency: Option<Duration>,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(instrument: impl Into<String>, book: TopOfBook) -> Self {
        Self {
            instrument: instrument.into(),
            book_latency: None,
            state: Mutex::new(PaperState {
                book,
                scripted_books: VecDeque::new(),
                random_walk_bps: None,
                open_orders: Vec::new(),
                fills: Vec::new(),
                balances: HashMap::new(),
                constraints: InstrumentConstraints::new(0.001, 4, 4),
                fee_rate: 0.0,
                failures: HashMap::new(),
                next_order_id: 0,
                next_trade_id: 0,
                calls: PaperCalls::default(),
            }),
        }
    }

    pub fn with_constraints(mut self, constraints: InstrumentConstraints) -> Self {
        self.state.get_mut().constraints = constraints;
        self
    }

    pub fn with_balance(mut self, asset: impl Into<String>, amount: f64) -> Self {
        self.state.get_mut().balances.insert(asset.into(), amount);
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.state.get_mut().fee_rate = fee_rate;
        self
    }

    /// Moves both sides of the book by a uniform shock of at most `step_bps` per fetch.
    pub fn with_random_walk(mut self, step_bps: f64) -> Self {
        self.state.get_mut().random_walk_bps = Some(step_bps);
        self
    }

    /// Delays every `get_top_of_book` response by `latency`.
    pub fn with_book_latency(mut self, latency: Duration) -> Self {
        self.book_latency = Some(latency);
        self
    }

    /// Queues books to be served, one per `get_top_of_book` call.
    pub async fn script_books(&self, books: impl IntoIterator<Item = TopOfBook>) {
        self.state.lock().await.scripted_books.extend(books);
    }

    pub async fn set_book(&self, book: TopOfBook) {
        let mut state = self.state.lock().await;
        state.scripted_books.clear();
        state.book = book;
    }

    pub async fn push_fill(&self, fill: Fill) {
        self.state.lock().await.fills.push(fill);
    }

    /// Makes the next `times` calls of `op` fail with a network error.
    pub async fn fail_next(&self, op: PaperOp, times: u32) {
        self.state.lock().await.failures.insert(op, times);
    }

    pub async fn fail_always(&self, op: PaperOp) {
        self.fail_next(op, u32::MAX).await;
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Places an order directly, bypassing failure injection.
    pub async fn seed_order(&self, side: Side, quantity: f64, price: f64) -> OrderRecord {
        let mut state = self.state.lock().await;
        state.next_order_id += 1;
        let record = OrderRecord::new(
            OrderId::new(format!("paper-{}", state.next_order_id)),
            side,
            price,
            quantity,
            OrderStatus::Open,
        );
        state.open_orders.push(record.clone());
        record
    }

    pub async fn open_orders(&self) -> Vec<OrderRecord> {
        self.state.lock().await.open_orders.clone()
    }

    pub async fn calls(&self) -> PaperCalls {
        self.state.lock().await.calls.clone()
    }

    fn check_instrument(&self, instrument: &str) -> ExchangeResult<()> {
        if instrument == self.instrument {
            Ok(())
        } else {
            Err(ExchangeError::UnknownInstrument(instrument.to_string()))
        }
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    async fn get_top_of_book(&self, instrument: &str) -> ExchangeResult<TopOfBook> {
        self.check_instrument(instrument)?;
        if let Some(latency) = self.book_latency {
            sleep(latency).await;
        }
        let mut state = self.state.lock().await;
        state.calls.book_fetches += 1;
        state.take_failure(PaperOp::TopOfBook)?;
        state.advance_book();
        Ok(state.book)
    }

    async fn list_open_orders(&self, instrument: &str) -> ExchangeResult<Vec<OrderRecord>> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.take_failure(PaperOp::ListOpenOrders)?;
        Ok(state.open_orders.clone())
    }

    async fn cancel_order(&self, order_id: &OrderId, instrument: &str) -> ExchangeResult<()> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.calls.cancels += 1;
        state.take_failure(PaperOp::CancelOrder)?;
        let before = state.open_orders.len();
        state.open_orders.retain(|order| &order.id != order_id);
        if state.open_orders.len() == before {
            return Err(ExchangeError::OrderNotFound(order_id.clone()));
        }
        Ok(())
    }

    async fn place_limit_order(
        &self,
        instrument: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> ExchangeResult<OrderRecord> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.calls.placements += 1;
        let op = match side {
            Side::Buy => PaperOp::PlaceBid,
            Side::Sell => PaperOp::PlaceAsk,
        };
        state.take_failure(op)?;
        if quantity < state.constraints.min_quantity {
            return Err(ExchangeError::rejected(format!(
                "quantity {} below minimum {}",
                quantity, state.constraints.min_quantity
            )));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(ExchangeError::rejected(format!("invalid price {}", price)));
        }
        state.next_order_id += 1;
        let record = OrderRecord::new(
            OrderId::new(format!("paper-{}", state.next_order_id)),
            side,
            price,
            quantity,
            OrderStatus::Open,
        );
        state.open_orders.push(record.clone());
        Ok(record)
    }

    async fn get_recent_fills(
        &self,
        instrument: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> ExchangeResult<Vec<Fill>> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.take_failure(PaperOp::RecentFills)?;
        let recent: Vec<Fill> = state
            .fills
            .iter()
            .filter(|fill| fill.timestamp >= since)
            .cloned()
            .collect();
        let skip = recent.len().saturating_sub(limit);
        Ok(recent.into_iter().skip(skip).collect())
    }

    async fn get_available_balance(&self, asset: &str) -> ExchangeResult<f64> {
        let mut state = self.state.lock().await;
        state.take_failure(PaperOp::Balance)?;
        Ok(state.balances.get(asset).copied().unwrap_or(0.0))
    }

    async fn set_leverage(&self, instrument: &str, multiplier: u32) -> ExchangeResult<()> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.take_failure(PaperOp::SetLeverage)?;
        state.calls.leverage = Some(multiplier);
        Ok(())
    }

    async fn set_position_mode(&self, instrument: &str, hedged: bool) -> ExchangeResult<()> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.take_failure(PaperOp::SetPositionMode)?;
        state.calls.hedged_mode = Some(hedged);
        Ok(())
    }

    async fn get_instrument_constraints(
        &self,
        instrument: &str,
    ) -> ExchangeResult<InstrumentConstraints> {
        self.check_instrument(instrument)?;
        let mut state = self.state.lock().await;
        state.take_failure(PaperOp::Constraints)?;
        Ok(state.constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOL: &str = "ETH/USDT:USDT";

    #[tokio::test]
    async fn test_scripted_books_then_hold() {
        let venue = PaperExchange::new(SYMBOL, TopOfBook::new(99.0, 101.0));
        venue
            .script_books([TopOfBook::empty(), TopOfBook::new(100.0, 102.0)])
            .await;
        assert_eq!(
            venue.get_top_of_book(SYMBOL).await.unwrap(),
            TopOfBook::empty()
        );
        let second = venue.get_top_of_book(SYMBOL).await.unwrap();
        assert_eq!(second.best_bid, Some(100.0));
        let third = venue.get_top_of_book(SYMBOL).await.unwrap();
        assert_eq!(third, second);
    }

    #[tokio::test]
    async fn test_failure_injection_is_consumed() {
        let venue = PaperExchange::new(SYMBOL, TopOfBook::new(99.0, 101.0));
        venue.fail_next(PaperOp::PlaceBid, 1).await;
        assert!(venue
            .place_limit_order(SYMBOL, Side::Buy, 1.0, 99.0)
            .await
            .is_err());
        assert!(venue
            .place_limit_order(SYMBOL, Side::Buy, 1.0, 99.0)
            .await
            .is_ok());
        assert_eq!(venue.open_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_instrument_rejected() {
        let venue = PaperExchange::new(SYMBOL, TopOfBook::new(99.0, 101.0));
        let err = venue.get_instrument_constraints("BTC").await.unwrap_err();
        assert_eq!(err, ExchangeError::UnknownInstrument("BTC".into()));
    }

    #[tokio::test]
    async fn test_crossed_orders_become_fills() {
        let venue =
            PaperExchange::new(SYMBOL, TopOfBook::new(99.0, 101.0)).with_fee_rate(0.001);
        venue
            .place_limit_order(SYMBOL, Side::Buy, 2.0, 99.5)
            .await
            .unwrap();
        venue
            .place_limit_order(SYMBOL, Side::Sell, 1.0, 103.0)
            .await
            .unwrap();
        venue.script_books([TopOfBook::new(98.0, 99.4)]).await;
        venue.get_top_of_book(SYMBOL).await.unwrap();

        let fills = venue
            .get_recent_fills(SYMBOL, Utc::now() - chrono::Duration::seconds(5), 10)
            .await
            .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, Side::Buy);
        assert!((fills[0].fee - 2.0 * 99.5 * 0.001).abs() < 1e-12);
        assert_eq!(venue.open_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_old_fills_are_discarded() {
        let venue = PaperExchange::new(SYMBOL, TopOfBook::new(99.0, 101.0));
        for (id, age_mins) in [("stale", 90), ("recent", 5)] {
            venue
                .push_fill(Fill {
                    trade_id: TradeId::new(id),
                    side: Side::Buy,
                    amount: 1.0,
                    price: 100.0,
                    fee: 0.0,
                    timestamp: Utc::now() - TimeDelta::minutes(age_mins),
                })
                .await;
        }
        venue.get_top_of_book(SYMBOL).await.unwrap();
        let fills = venue.state.lock().await.fills.clone();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].trade_id, TradeId::new("recent"));
    }

    #[tokio::test]
    async fn test_cancel_missing_order() {
        let venue = PaperExchange::new(SYMBOL, TopOfBook::new(99.0, 101.0));
        let err = venue
            .cancel_order(&OrderId::new("nope"), SYMBOL)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::OrderNotFound(_)));
    }
}
