use super::types::{CancelReport, LegResult, QuoteSet, ReplaceOutcome};
use crate::{
    errors::ExchangeError,
    exchange::ExchangeConnector,
    timings::time_async_block,
    types::{InstrumentConstraints, OrderId, OrderRecord, OrderStatus, Side},
};
use tracing::{debug, info, warn};

/// Keeps at most one resting bid and one resting ask.
///
/// Every replacement first sweeps the instrument's open orders, then places
/// each leg independently. Nothing here returns an error: failures are logged
/// and reported in the outcome so the caller can keep quoting one-sided.
#[derive(Debug)]
pub struct OrderLifecycleManager {
    instrument: String,
    constraints: InstrumentConstraints,
    open_bid: Option<OrderRecord>,
    open_ask: Option<OrderRecord>,
    /// Orders whose last cancel attempt failed and may still be resting.
    uncancelled: Vec<OrderId>,
}

impl OrderLifecycleManager {
    pub fn new(instrument: impl Into<String>, constraints: InstrumentConstraints) -> Self {
        Self {
            instrument: instrument.into(),
            constraints,
            open_bid: None,
            open_ask: None,
            uncancelled: Vec::new(),
        }
    }

    pub fn set_constraints(&mut self, constraints: InstrumentConstraints) {
        self.constraints = constraints;
    }

    pub fn constraints(&self) -> &InstrumentConstraints {
        &self.constraints
    }

    pub fn open_bid(&self) -> Option<&OrderRecord> {
        self.open_bid.as_ref()
    }

    pub fn open_ask(&self) -> Option<&OrderRecord> {
        self.open_ask.as_ref()
    }

    pub fn uncancelled(&self) -> &[OrderId] {
        &self.uncancelled
    }

    pub async fn replace_quotes<C>(&mut self, connector: &C, quotes: &QuoteSet) -> ReplaceOutcome
    where
        C: ExchangeConnector + ?Sized,
    {
        let cancel = self.cancel_all(connector).await;

        let bid_price = self.constraints.round_bid_price(quotes.bid_price);
        let ask_price = self.constraints.round_ask_price(quotes.ask_price);
        let bid = self
            .place_leg(connector, Side::Buy, quotes.size, bid_price)
            .await;
        let ask = self
            .place_leg(connector, Side::Sell, quotes.size, ask_price)
            .await;

        self.open_bid = bid.order().cloned();
        self.open_ask = ask.order().cloned();

        ReplaceOutcome { cancel, bid, ask }
    }

    /// Best-effort sweep of every open order on the instrument. If the listing
    /// itself fails, the orders this manager placed, plus any whose cancel
    /// failed earlier, are cancelled instead.
    pub async fn cancel_all<C>(&mut self, connector: &C) -> CancelReport
    where
        C: ExchangeConnector + ?Sized,
    {
        let mut report = CancelReport::default();
        let targets: Vec<OrderId> = match time_async_block(
            "list_open_orders",
            connector.list_open_orders(&self.instrument),
        )
        .await
        {
            Ok(orders) => orders.into_iter().map(|order| order.id).collect(),
            Err(err) => {
                warn!(
                    instrument = %self.instrument,
                    error = %err,
                    "Error listing open orders; cancelling tracked orders only"
                );
                report.listing_failed = true;
                let mut ids: Vec<OrderId> = self
                    .open_bid
                    .iter()
                    .chain(self.open_ask.iter())
                    .map(|order| order.id.clone())
                    .collect();
                for id in &self.uncancelled {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
                ids
            }
        };

        let mut uncancelled = Vec::new();
        for order_id in targets {
            match time_async_block(
                "cancel_order",
                connector.cancel_order(&order_id, &self.instrument),
            )
            .await
            {
                Ok(()) => {
                    debug!(order_id = %order_id, "Cancelled order");
                    report.cancelled += 1;
                }
                Err(ExchangeError::OrderNotFound(_)) => {
                    debug!(order_id = %order_id, "Order already gone");
                    report.cancelled += 1;
                }
                Err(err) => {
                    warn!(
                        instrument = %self.instrument,
                        order_id = %order_id,
                        error = %err,
                        "Error cancelling order"
                    );
                    report.failed += 1;
                    uncancelled.push(order_id);
                }
            }
        }

        self.open_bid = None;
        self.open_ask = None;
        self.uncancelled = uncancelled;
        report
    }

    async fn place_leg<C>(&self, connector: &C, side: Side, quantity: f64, price: f64) -> LegResult
    where
        C: ExchangeConnector + ?Sized,
    {
        if !(price.is_finite() && price > 0.0 && quantity.is_finite() && quantity > 0.0) {
            let reason = format!("invalid {} quote: {} @ {}", side.leg(), quantity, price);
            warn!(instrument = %self.instrument, "{}", reason);
            return LegResult::Failed(reason);
        }

        let placed = time_async_block(
            "place_limit_order",
            connector.place_limit_order(&self.instrument, side, quantity, price),
        )
        .await;
        match placed {
            Ok(mut order) => {
                order.status = OrderStatus::Open;
                info!(
                    instrument = %self.instrument,
                    leg = side.leg(),
                    order_id = %order.id,
                    quantity,
                    price,
                    "Quote placed"
                );
                LegResult::Placed(order)
            }
            Err(err) => {
                warn!(
                    instrument = %self.instrument,
                    leg = side.leg(),
                    quantity,
                    price,
                    error = %err,
                    "Error placing quote"
                );
                LegResult::Failed(err.to_string())
            }
        }
    }
}
