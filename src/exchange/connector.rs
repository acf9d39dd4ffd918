//! Capability set the quoting core needs from an exchange.
//!
//! Implementations own authentication, transport and any venue-specific
//! parameter normalisation. Every call returns an [`ExchangeResult`] so the
//! caller can decide per call whether a failure is fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::ExchangeResult;
use crate::types::{Fill, InstrumentConstraints, OrderId, OrderRecord, Side, TopOfBook};

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Best bid/ask for the instrument. Missing sides are `None`.
    async fn get_top_of_book(&self, instrument: &str) -> ExchangeResult<TopOfBook>;

    async fn list_open_orders(&self, instrument: &str) -> ExchangeResult<Vec<OrderRecord>>;

    async fn cancel_order(&self, order_id: &OrderId, instrument: &str) -> ExchangeResult<()>;

    async fn place_limit_order(
        &self,
        instrument: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> ExchangeResult<OrderRecord>;

    /// Own trades executed at or after `since`, newest last, at most `limit`.
    async fn get_recent_fills(
        &self,
        instrument: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> ExchangeResult<Vec<Fill>>;

    async fn get_available_balance(&self, asset: &str) -> ExchangeResult<f64>;

    async fn set_leverage(&self, instrument: &str, multiplier: u32) -> ExchangeResult<()>;

    /// Switch between one-way (`hedged = false`) and hedge position mode.
    async fn set_position_mode(&self, instrument: &str, hedged: bool) -> ExchangeResult<()>;

    async fn get_instrument_constraints(
        &self,
        instrument: &str,
    ) -> ExchangeResult<InstrumentConstraints>;
}
