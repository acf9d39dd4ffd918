use super::{
    config::StrategyConfig,
    execution::OrderLifecycleManager,
    inventory::InventoryTracker,
    market_data::MarketDataState,
    sizing::PositionSizer,
    spreads::{QuoteComputation, QuoteEngine},
    types::{
        CancelReport, InventorySnapshot, QuoteSet, ReplaceOutcome, StrategyMetrics, TickOutcome,
        TickReport,
    },
    volatility::VolEstimator,
};
use crate::{
    errors::ExchangeError,
    exchange::ExchangeConnector,
    timings::{cadence_remainder, time_async_block, timed_async},
    types::InstrumentConstraints,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Running,
    ErrorBackoff,
    Draining,
    Stopped,
}

/// Drives the quoting loop for one instrument.
///
/// Owns every decision component and calls them in a fixed order per tick:
/// market data, volatility, fills, quote, size, order replacement, status.
pub struct StrategyScheduler<C: ExchangeConnector + ?Sized> {
    connector: Arc<C>,
    config: StrategyConfig,
    quote_engine: QuoteEngine,
    volatility: VolEstimator,
    sizer: PositionSizer,
    inventory: InventoryTracker,
    market_data: MarketDataState,
    orders: OrderLifecycleManager,
    constraints: InstrumentConstraints,
    state: SchedulerState,
    metrics: StrategyMetrics,
}

impl<C: ExchangeConnector + ?Sized> StrategyScheduler<C> {
    /// Fails on an invalid configuration; nothing is sent to the exchange.
    pub fn new(config: StrategyConfig, connector: Arc<C>) -> Result<Self> {
        config.validate().context("invalid strategy configuration")?;

        let constraints = config.fallback_constraints();
        Ok(Self {
            quote_engine: QuoteEngine::new(config.core_params(), config.safety_bounds()),
            volatility: VolEstimator::new(
                config.sigma_lookback,
                config.initial_volatility,
                config.volatility_floor,
                config.annualization_ticks(),
            ),
            sizer: PositionSizer::from_config(&config),
            inventory: InventoryTracker::new(config.fill_lookback_secs),
            market_data: MarketDataState::new(),
            orders: OrderLifecycleManager::new(config.instrument.clone(), constraints),
            constraints,
            state: SchedulerState::Init,
            metrics: StrategyMetrics::default(),
            connector,
            config,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn metrics(&self) -> &StrategyMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn constraints(&self) -> &InstrumentConstraints {
        &self.constraints
    }

    pub fn inventory(&self) -> InventorySnapshot {
        self.inventory.snapshot()
    }

    pub fn volatility(&self) -> f64 {
        self.volatility.estimate()
    }

    pub fn orders(&self) -> &OrderLifecycleManager {
        &self.orders
    }

    /// INIT: loads instrument constraints and applies account settings.
    ///
    /// Only an unknown instrument is fatal. Other constraint errors fall back to
    /// the configured values; leverage and position mode are best effort.
    pub async fn initialize(&mut self) -> Result<()> {
        let instrument = self.config.instrument.clone();

        match self.connector.get_instrument_constraints(&instrument).await {
            Ok(constraints) => {
                info!(
                    instrument = %instrument,
                    min_quantity = constraints.min_quantity,
                    quantity_precision = constraints.quantity_precision,
                    price_precision = constraints.price_precision,
                    "Loaded instrument constraints"
                );
                self.set_constraints(constraints);
            }
            Err(ExchangeError::UnknownInstrument(name)) => {
                bail!("instrument {} is not listed on the exchange", name);
            }
            Err(err) => {
                warn!(
                    operation = "get_instrument_constraints",
                    instrument = %instrument,
                    transient = err.is_transient(),
                    error = %err,
                    "Using configured instrument constraints"
                );
            }
        }

        if let Err(err) = self
            .connector
            .set_leverage(&instrument, self.config.leverage)
            .await
        {
            warn!(
                operation = "set_leverage",
                instrument = %instrument,
                leverage = self.config.leverage,
                error = %err,
                "Failed to set leverage"
            );
        }

        if self.config.one_way_position_mode {
            if let Err(err) = self.connector.set_position_mode(&instrument, false).await {
                warn!(
                    operation = "set_position_mode",
                    instrument = %instrument,
                    error = %err,
                    "Failed to set one-way position mode"
                );
            }
        }

        self.state = SchedulerState::Running;
        info!(
            instrument = %instrument,
            gamma = self.config.gamma,
            kappa = self.config.kappa,
            cadence_ms = self.config.update_interval_ms,
            "Strategy initialised"
        );
        Ok(())
    }

    fn set_constraints(&mut self, constraints: InstrumentConstraints) {
        self.constraints = constraints;
        self.orders.set_constraints(constraints);
    }

    /// One quoting cycle. Errors only escape when the book itself cannot be
    /// fetched; every later sub-step degrades in place.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let now = Utc::now();
        let instrument = self.config.instrument.clone();

        let book = time_async_block("get_top_of_book", self.connector.get_top_of_book(&instrument))
            .await
            .with_context(|| format!("get_top_of_book failed for {}", instrument))?;
        let snapshot = match self.market_data.on_top_of_book(&book, now) {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                self.metrics.skipped_ticks += 1;
                debug!(
                    instrument = %instrument,
                    reason,
                    rejected_books = self.market_data.rejected_books(),
                    last_mid = ?self.market_data.last_snapshot().map(|s| s.mid),
                    "No usable top of book; skipping tick"
                );
                return Ok(TickOutcome::Skipped(reason));
            }
        };

        self.volatility.observe(snapshot.mid);
        let sigma = self.volatility.estimate();

        self.sync_fills(now).await;
        let inventory = self.inventory.snapshot();

        let QuoteComputation { quotes, context } =
            self.quote_engine.quote(snapshot.mid, inventory.position, sigma);
        let size = self
            .sizer
            .size(snapshot.mid, inventory.position, &self.constraints);
        let quotes = quotes.with_size(size);

        let available_balance = match self
            .connector
            .get_available_balance(&self.config.quote_asset)
            .await
        {
            Ok(balance) => Some(balance),
            Err(err) => {
                warn!(
                    operation = "get_available_balance",
                    asset = %self.config.quote_asset,
                    error = %err,
                    "Balance unavailable for status report"
                );
                None
            }
        };

        let outcome = self
            .orders
            .replace_quotes(&*self.connector, &quotes)
            .await;

        self.record_tick(&inventory, sigma, context.reservation_price, &quotes, snapshot.mid, &outcome);
        info!(
            instrument = %instrument,
            mid = snapshot.mid,
            spread_bps = quotes.spread_bps(snapshot.mid),
            sigma,
            inventory = inventory.position,
            notional = inventory.notional(snapshot.mid),
            bid = quotes.bid_price,
            ask = quotes.ask_price,
            size = quotes.size,
            trades = inventory.trades_count,
            fees = inventory.fees_paid,
            balance = ?available_balance,
            bid_placed = outcome.bid.is_placed(),
            ask_placed = outcome.ask.is_placed(),
            "Quote cycle"
        );

        Ok(TickOutcome::Quoted(Box::new(TickReport {
            snapshot,
            sigma,
            inventory,
            quotes,
            context,
            available_balance,
            outcome,
        })))
    }

    async fn sync_fills(&mut self, now: DateTime<Utc>) {
        let since = self.inventory.window_start(now);
        let fetched = time_async_block(
            "get_recent_fills",
            self.connector.get_recent_fills(
                &self.config.instrument,
                since,
                self.config.fill_fetch_limit,
            ),
        )
        .await;
        match fetched {
            Ok(fills) => {
                let summary = self.inventory.reconcile(&fills, now);
                if summary.applied > 0 {
                    debug!(
                        applied = summary.applied,
                        position = self.inventory.position(),
                        "Reconciled fills"
                    );
                }
            }
            Err(err) => {
                warn!(
                    operation = "get_recent_fills",
                    instrument = %self.config.instrument,
                    error = %err,
                    "Fill fetch failed; inventory unchanged this tick"
                );
            }
        }
    }

    fn record_tick(
        &mut self,
        inventory: &InventorySnapshot,
        sigma: f64,
        reservation_price: f64,
        quotes: &QuoteSet,
        mid: f64,
        outcome: &ReplaceOutcome,
    ) {
        let m = &mut self.metrics;
        m.ticks += 1;
        m.bids_placed += u64::from(outcome.bid.is_placed());
        m.asks_placed += u64::from(outcome.ask.is_placed());
        m.failed_legs +=
            u64::from(!outcome.bid.is_placed()) + u64::from(!outcome.ask.is_placed());
        m.cancel_failures += outcome.cancel.failed as u64;
        m.trades_count = inventory.trades_count;
        m.buy_volume = inventory.buy_volume;
        m.sell_volume = inventory.sell_volume;
        m.fees_paid = inventory.fees_paid;
        m.position = inventory.position;
        m.last_sigma = Some(sigma);
        m.last_reservation_price = Some(reservation_price);
        m.last_spread_bps = Some(quotes.spread_bps(mid));
    }

    /// Runs INIT (if not done yet) and the RUNNING / ERROR_BACKOFF loop until
    /// `shutdown` turns true or its sender is dropped, then drains.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<StrategyMetrics> {
        if self.state == SchedulerState::Init {
            self.initialize().await?;
        }

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if self.state == SchedulerState::ErrorBackoff {
                info!(instrument = %self.config.instrument, "Resuming after backoff");
            }
            self.state = SchedulerState::Running;

            let (result, elapsed) = timed_async("tick", self.tick()).await;
            self.metrics.last_tick_latency_ms = Some(elapsed.as_secs_f64() * 1e3);

            let pause = match result {
                Ok(TickOutcome::Quoted(_)) => {
                    cadence_remainder(self.config.update_interval(), elapsed)
                }
                Ok(TickOutcome::Skipped(_)) => self.config.empty_book_backoff(),
                Err(err) => {
                    self.metrics.errors += 1;
                    self.state = SchedulerState::ErrorBackoff;
                    let transient = err
                        .downcast_ref::<ExchangeError>()
                        .map(ExchangeError::is_transient);
                    error!(
                        instrument = %self.config.instrument,
                        error = %format!("{:#}", err),
                        transient = ?transient,
                        backoff_ms = self.config.error_backoff_ms,
                        "Tick failed"
                    );
                    self.config.error_backoff()
                }
            };

            if wait_for_shutdown(&mut shutdown, pause).await {
                break;
            }
        }

        let report = self.drain().await;
        info!(
            instrument = %self.config.instrument,
            cancelled = report.cancelled,
            failed = report.failed,
            listing_failed = report.listing_failed,
            ticks = self.metrics.ticks,
            errors = self.metrics.errors,
            "Strategy stopped"
        );
        Ok(self.metrics.clone())
    }

    /// DRAINING: best-effort cancel of every open order, then STOPPED.
    pub async fn drain(&mut self) -> CancelReport {
        self.state = SchedulerState::Draining;
        info!(instrument = %self.config.instrument, "Draining open orders");
        let report = self.orders.cancel_all(&*self.connector).await;
        if !report.is_clean() {
            warn!(
                instrument = %self.config.instrument,
                failed = report.failed,
                listing_failed = report.listing_failed,
                "Drain left orders that may still be resting"
            );
        }
        self.metrics.cancel_failures += report.failed as u64;
        self.state = SchedulerState::Stopped;
        report
    }
}

/// Sleeps for `pause` unless a stop is signalled first. Returns true on stop.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    let deadline = Instant::now() + pause;
    loop {
        if *shutdown.borrow_and_update() {
            return true;
        }
        let closed = tokio::select! {
            _ = sleep_until(deadline) => None,
            changed = shutdown.changed() => Some(changed.is_err()),
        };
        match closed {
            None => return *shutdown.borrow(),
            Some(true) => return true,
            Some(false) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperExchange, PaperOp};
    use crate::types::{Fill, Side, TopOfBook, TradeId};
    use tokio::time::sleep;

    fn fast_config() -> StrategyConfig {
        StrategyConfig {
            update_interval_ms: 5,
            empty_book_backoff_ms: 5,
            error_backoff_ms: 5,
            ..StrategyConfig::default()
        }
    }

    fn venue() -> Arc<PaperExchange> {
        let cfg = StrategyConfig::default();
        Arc::new(
            PaperExchange::new(cfg.instrument, TopOfBook::new(0.4999, 0.5001))
                .with_balance(cfg.quote_asset, 250.0),
        )
    }

    async fn ready(venue: &Arc<PaperExchange>) -> StrategyScheduler<PaperExchange> {
        let mut scheduler = StrategyScheduler::new(fast_config(), Arc::clone(venue)).unwrap();
        scheduler.initialize().await.unwrap();
        scheduler
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let cfg = StrategyConfig {
            gamma: 0.0,
            ..StrategyConfig::default()
        };
        assert!(StrategyScheduler::new(cfg, venue()).is_err());
    }

    #[tokio::test]
    async fn test_tick_quotes_both_sides() {
        let venue = venue();
        let mut scheduler = ready(&venue).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(venue.calls().await.leverage, Some(5));

        let TickOutcome::Quoted(report) = scheduler.tick().await.unwrap() else {
            panic!("expected a quoted tick");
        };
        assert!(report.outcome.bid.is_placed());
        assert!(report.outcome.ask.is_placed());
        assert!(report.quotes.bid_price < report.snapshot.mid);
        assert!(report.quotes.ask_price > report.snapshot.mid);
        assert!((report.quotes.size - 20.0).abs() < 1e-9);
        assert_eq!(report.available_balance, Some(250.0));
        assert_eq!(venue.open_orders().await.len(), 2);
        assert_eq!(scheduler.metrics().ticks, 1);
        assert_eq!(scheduler.metrics().bids_placed, 1);
    }

    #[tokio::test]
    async fn test_empty_book_is_a_skip_not_an_error() {
        let venue = venue();
        let mut scheduler = ready(&venue).await;
        venue.set_book(TopOfBook::empty()).await;
        let outcome = scheduler.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Skipped("missing_bid"));
        assert_eq!(venue.calls().await.placements, 0);
        assert_eq!(scheduler.metrics().skipped_ticks, 1);
        assert_eq!(scheduler.volatility(), 0.01);
    }

    #[tokio::test]
    async fn test_book_failure_escapes_tick() {
        let venue = venue();
        let mut scheduler = ready(&venue).await;
        venue.fail_next(PaperOp::TopOfBook, 1).await;
        assert!(scheduler.tick().await.is_err());
        assert!(scheduler.tick().await.is_ok());
    }

    #[tokio::test]
    async fn test_side_step_failures_degrade_in_place() {
        let venue = venue();
        let mut scheduler = ready(&venue).await;
        venue.fail_next(PaperOp::RecentFills, 1).await;
        venue.fail_next(PaperOp::Balance, 1).await;
        venue.fail_next(PaperOp::PlaceAsk, 1).await;
        let TickOutcome::Quoted(report) = scheduler.tick().await.unwrap() else {
            panic!("expected a quoted tick");
        };
        assert_eq!(report.available_balance, None);
        assert!(report.outcome.bid.is_placed());
        assert!(!report.outcome.ask.is_placed());
        assert_eq!(scheduler.metrics().failed_legs, 1);
    }

    #[tokio::test]
    async fn test_fills_are_reconciled_once() {
        let venue = venue();
        let mut scheduler = ready(&venue).await;
        venue
            .push_fill(Fill {
                trade_id: TradeId::new("t-1"),
                side: Side::Buy,
                amount: 30.0,
                price: 0.5,
                fee: 0.003,
                timestamp: Utc::now(),
            })
            .await;

        scheduler.tick().await.unwrap();
        let TickOutcome::Quoted(report) = scheduler.tick().await.unwrap() else {
            panic!("expected a quoted tick");
        };
        assert_eq!(report.inventory.position, 30.0);
        assert_eq!(report.inventory.trades_count, 1);
        assert!((scheduler.metrics().fees_paid - 0.003).abs() < 1e-12);
        // Long inventory skews the reservation price below mid.
        assert!(report.context.reservation_price < report.snapshot.mid);
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_fatal_at_init() {
        let venue = venue();
        let cfg = StrategyConfig {
            instrument: "DOGE/USDC:USDC".to_string(),
            ..fast_config()
        };
        let mut scheduler = StrategyScheduler::new(cfg, Arc::clone(&venue)).unwrap();
        assert!(scheduler.initialize().await.is_err());
        assert_eq!(scheduler.state(), SchedulerState::Init);
    }

    #[tokio::test]
    async fn test_init_settings_are_best_effort() {
        let venue = venue();
        venue.fail_always(PaperOp::Constraints).await;
        venue.fail_always(PaperOp::SetLeverage).await;
        venue.fail_always(PaperOp::SetPositionMode).await;
        let cfg = StrategyConfig {
            one_way_position_mode: true,
            min_order_quantity: 2.0,
            ..fast_config()
        };
        let mut scheduler = StrategyScheduler::new(cfg.clone(), Arc::clone(&venue)).unwrap();
        scheduler.initialize().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(*scheduler.constraints(), cfg.fallback_constraints());
        assert_eq!(venue.calls().await.leverage, None);
    }

    #[tokio::test]
    async fn test_one_way_mode_requested_when_configured() {
        let venue = venue();
        let cfg = StrategyConfig {
            one_way_position_mode: true,
            ..fast_config()
        };
        let mut scheduler = StrategyScheduler::new(cfg, Arc::clone(&venue)).unwrap();
        scheduler.initialize().await.unwrap();
        assert_eq!(venue.calls().await.hedged_mode, Some(false));
    }

    #[tokio::test]
    async fn test_run_backs_off_then_drains_on_stop() {
        let venue = venue();
        venue.fail_next(PaperOp::TopOfBook, 2).await;
        let mut scheduler = StrategyScheduler::new(fast_config(), Arc::clone(&venue)).unwrap();

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            sleep(Duration::from_millis(80)).await;
            let _ = tx.send(true);
        });

        let metrics = scheduler.run(rx).await.unwrap();
        assert_eq!(metrics.errors, 2);
        assert!(metrics.ticks >= 1);
        assert!(metrics.last_tick_latency_ms.is_some());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(venue.open_orders().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quoted_ticks_hold_fixed_cadence() {
        let cfg = StrategyConfig {
            update_interval_ms: 1000,
            ..fast_config()
        };
        let venue = Arc::new(
            PaperExchange::new(cfg.instrument.clone(), TopOfBook::new(0.4999, 0.5001))
                .with_book_latency(Duration::from_millis(300)),
        );
        let mut scheduler = StrategyScheduler::new(cfg, Arc::clone(&venue)).unwrap();

        let (tx, rx) = watch::channel(false);
        let observed = Arc::clone(&venue);
        let watcher = tokio::spawn(async move {
            let start = Instant::now();
            let mut fetches = Vec::new();
            for at_ms in [1400, 2400] {
                sleep_until(start + Duration::from_millis(at_ms)).await;
                fetches.push(observed.calls().await.book_fetches);
            }
            let _ = tx.send(true);
            fetches
        });

        let metrics = scheduler.run(rx).await.unwrap();
        // Ticks start at 0, 1000 and 2000 ms; each book arrives 300 ms later.
        // A fixed 1000 ms pause would start them at 0, 1300 and 2600 ms.
        assert_eq!(watcher.await.unwrap(), vec![2, 3]);
        let latency = metrics.last_tick_latency_ms.unwrap_or_default();
        assert!((latency - 300.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_stop_before_first_tick_still_drains() {
        let venue = venue();
        venue.seed_order(Side::Sell, 10.0, 0.6).await;
        let mut scheduler = StrategyScheduler::new(fast_config(), Arc::clone(&venue)).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let metrics = scheduler.run(rx).await.unwrap();
        assert_eq!(metrics.ticks, 0);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(venue.open_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let venue = venue();
        let mut scheduler = StrategyScheduler::new(fast_config(), Arc::clone(&venue)).unwrap();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let metrics = scheduler.run(rx).await.unwrap();
        assert!(metrics.ticks <= 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
