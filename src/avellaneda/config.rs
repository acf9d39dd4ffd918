use super::types::{SafetyBounds, StrategyParams};
use crate::types::InstrumentConstraints;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};

/// Immutable per-run strategy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_instrument")]
    pub instrument: String,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_kappa")]
    pub kappa: f64,
    /// Reserved. Loaded and validated but not part of any pricing formula.
    #[serde(default = "default_inventory_penalty")]
    pub inventory_penalty: f64,
    #[serde(default = "default_time_horizon")]
    pub time_horizon: f64,
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: f64,
    #[serde(default = "default_min_time_remaining")]
    pub min_time_remaining: f64,
    #[serde(default = "default_sigma_lookback")]
    pub sigma_lookback: usize,
    #[serde(default = "default_initial_volatility")]
    pub initial_volatility: f64,
    #[serde(default = "default_volatility_floor")]
    pub volatility_floor: f64,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub empty_book_backoff_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_max_inventory_notional")]
    pub max_inventory_notional: f64,
    #[serde(default = "default_half")]
    pub inventory_throttle_threshold: f64,
    #[serde(default = "default_half")]
    pub inventory_throttle_factor: f64,
    #[serde(default = "default_min_order_notional")]
    pub min_order_notional: f64,
    #[serde(default = "default_min_order_quantity")]
    pub min_order_quantity: f64,
    #[serde(default = "default_precision")]
    pub quantity_precision: u32,
    #[serde(default = "default_precision")]
    pub price_precision: u32,
    #[serde(default = "default_min_spread")]
    pub min_spread: f64,
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: f64,
    #[serde(default = "default_non_crossing_epsilon")]
    pub non_crossing_epsilon: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub one_way_position_mode: bool,
    #[serde(default = "default_fill_lookback_secs")]
    pub fill_lookback_secs: u64,
    #[serde(default = "default_fill_fetch_limit")]
    pub fill_fetch_limit: usize,
}

fn default_instrument() -> String {
    "XRP/USDC:USDC".to_string()
}

fn default_quote_asset() -> String {
    "USDC".to_string()
}

fn default_gamma() -> f64 {
    0.1
}

fn default_kappa() -> f64 {
    1.5
}

fn default_inventory_penalty() -> f64 {
    0.01
}

fn default_time_horizon() -> f64 {
    1.0
}

fn default_time_step() -> f64 {
    1.0 / 3600.0
}

fn default_cycle_seconds() -> f64 {
    3600.0
}

fn default_min_time_remaining() -> f64 {
    0.01
}

fn default_sigma_lookback() -> usize {
    100
}

fn default_initial_volatility() -> f64 {
    0.01
}

fn default_volatility_floor() -> f64 {
    0.001
}

fn default_update_interval_ms() -> u64 {
    1000
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_max_inventory_notional() -> f64 {
    100.0
}

fn default_half() -> f64 {
    0.5
}

fn default_min_order_notional() -> f64 {
    10.0
}

fn default_min_order_quantity() -> f64 {
    0.001
}

fn default_precision() -> u32 {
    4
}

fn default_min_spread() -> f64 {
    0.0001
}

fn default_max_spread_pct() -> f64 {
    0.01
}

fn default_non_crossing_epsilon() -> f64 {
    0.0005
}

fn default_leverage() -> u32 {
    5
}

fn default_fill_lookback_secs() -> u64 {
    60
}

fn default_fill_fetch_limit() -> usize {
    10
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            instrument: default_instrument(),
            quote_asset: default_quote_asset(),
            gamma: default_gamma(),
            kappa: default_kappa(),
            inventory_penalty: default_inventory_penalty(),
            time_horizon: default_time_horizon(),
            time_step: default_time_step(),
            cycle_seconds: default_cycle_seconds(),
            min_time_remaining: default_min_time_remaining(),
            sigma_lookback: default_sigma_lookback(),
            initial_volatility: default_initial_volatility(),
            volatility_floor: default_volatility_floor(),
            update_interval_ms: default_update_interval_ms(),
            empty_book_backoff_ms: default_backoff_ms(),
            error_backoff_ms: default_backoff_ms(),
            max_inventory_notional: default_max_inventory_notional(),
            inventory_throttle_threshold: default_half(),
            inventory_throttle_factor: default_half(),
            min_order_notional: default_min_order_notional(),
            min_order_quantity: default_min_order_quantity(),
            quantity_precision: default_precision(),
            price_precision: default_precision(),
            min_spread: default_min_spread(),
            max_spread_pct: default_max_spread_pct(),
            non_crossing_epsilon: default_non_crossing_epsilon(),
            leverage: default_leverage(),
            one_way_position_mode: false,
            fill_lookback_secs: default_fill_lookback_secs(),
            fill_fetch_limit: default_fill_fetch_limit(),
        }
    }
}

impl StrategyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&data)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults plus env overrides, for running without a config file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses TOML with either a nested `[strategy]` table or top-level keys.
    /// Does not apply env overrides or validate.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let raw: toml::Value = toml::from_str(data).with_context(|| "Failed to parse TOML config")?;
        let table = match raw.get("strategy") {
            Some(nested) => nested.clone(),
            None => raw,
        };
        table
            .try_into()
            .with_context(|| "Invalid strategy config structure")
    }

    fn apply_env_overrides(&mut self) {
        // Each field can be overridden by `AVELLANEDA_*` env vars.
        override_string("AVELLANEDA_INSTRUMENT", &mut self.instrument);
        override_string("AVELLANEDA_QUOTE_ASSET", &mut self.quote_asset);
        override_parsed("AVELLANEDA_GAMMA", &mut self.gamma);
        override_parsed("AVELLANEDA_KAPPA", &mut self.kappa);
        override_parsed("AVELLANEDA_INVENTORY_PENALTY", &mut self.inventory_penalty);
        override_parsed("AVELLANEDA_TIME_HORIZON", &mut self.time_horizon);
        override_parsed("AVELLANEDA_TIME_STEP", &mut self.time_step);
        override_parsed("AVELLANEDA_CYCLE_SECONDS", &mut self.cycle_seconds);
        override_parsed(
            "AVELLANEDA_MIN_TIME_REMAINING",
            &mut self.min_time_remaining,
        );
        override_parsed("AVELLANEDA_SIGMA_LOOKBACK", &mut self.sigma_lookback);
        override_parsed(
            "AVELLANEDA_INITIAL_VOLATILITY",
            &mut self.initial_volatility,
        );
        override_parsed("AVELLANEDA_VOLATILITY_FLOOR", &mut self.volatility_floor);
        override_parsed(
            "AVELLANEDA_UPDATE_INTERVAL_MS",
            &mut self.update_interval_ms,
        );
        override_parsed(
            "AVELLANEDA_EMPTY_BOOK_BACKOFF_MS",
            &mut self.empty_book_backoff_ms,
        );
        override_parsed("AVELLANEDA_ERROR_BACKOFF_MS", &mut self.error_backoff_ms);
        override_parsed(
            "AVELLANEDA_MAX_INVENTORY_NOTIONAL",
            &mut self.max_inventory_notional,
        );
        override_parsed(
            "AVELLANEDA_INVENTORY_THROTTLE_THRESHOLD",
            &mut self.inventory_throttle_threshold,
        );
        override_parsed(
            "AVELLANEDA_INVENTORY_THROTTLE_FACTOR",
            &mut self.inventory_throttle_factor,
        );
        override_parsed(
            "AVELLANEDA_MIN_ORDER_NOTIONAL",
            &mut self.min_order_notional,
        );
        override_parsed(
            "AVELLANEDA_MIN_ORDER_QUANTITY",
            &mut self.min_order_quantity,
        );
        override_parsed(
            "AVELLANEDA_QUANTITY_PRECISION",
            &mut self.quantity_precision,
        );
        override_parsed("AVELLANEDA_PRICE_PRECISION", &mut self.price_precision);
        override_parsed("AVELLANEDA_MIN_SPREAD", &mut self.min_spread);
        override_parsed("AVELLANEDA_MAX_SPREAD_PCT", &mut self.max_spread_pct);
        override_parsed(
            "AVELLANEDA_NON_CROSSING_EPSILON",
            &mut self.non_crossing_epsilon,
        );
        override_parsed("AVELLANEDA_LEVERAGE", &mut self.leverage);
        override_parsed(
            "AVELLANEDA_ONE_WAY_POSITION_MODE",
            &mut self.one_way_position_mode,
        );
        override_parsed(
            "AVELLANEDA_FILL_LOOKBACK_SECS",
            &mut self.fill_lookback_secs,
        );
        override_parsed("AVELLANEDA_FILL_FETCH_LIMIT", &mut self.fill_fetch_limit);
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.instrument.trim().is_empty(),
            "instrument must not be empty"
        );
        anyhow::ensure!(
            positive(self.gamma),
            "gamma must be strictly positive"
        );
        anyhow::ensure!(
            positive(self.kappa),
            "kappa must be strictly positive"
        );
        anyhow::ensure!(
            self.inventory_penalty.is_finite() && self.inventory_penalty >= 0.0,
            "inventory_penalty must be non-negative"
        );
        anyhow::ensure!(
            positive(self.time_horizon),
            "time_horizon must be strictly positive"
        );
        anyhow::ensure!(
            positive(self.time_step),
            "time_step must be strictly positive"
        );
        anyhow::ensure!(
            positive(self.cycle_seconds),
            "cycle_seconds must be strictly positive"
        );
        anyhow::ensure!(
            positive(self.min_time_remaining),
            "min_time_remaining must be strictly positive"
        );
        anyhow::ensure!(
            (3..=MAX_SIGMA_LOOKBACK).contains(&self.sigma_lookback),
            "sigma_lookback must be within [3, {}]",
            MAX_SIGMA_LOOKBACK
        );
        anyhow::ensure!(
            positive(self.initial_volatility) && positive(self.volatility_floor),
            "initial_volatility and volatility_floor must be strictly positive"
        );
        anyhow::ensure!(
            self.update_interval_ms > 0,
            "update_interval_ms must be greater than zero"
        );
        anyhow::ensure!(
            positive(self.max_inventory_notional),
            "max_inventory_notional must be strictly positive"
        );
        anyhow::ensure!(
            self.inventory_throttle_threshold > 0.0 && self.inventory_throttle_threshold <= 1.0,
            "inventory_throttle_threshold must be within (0, 1]"
        );
        anyhow::ensure!(
            self.inventory_throttle_factor > 0.0 && self.inventory_throttle_factor <= 1.0,
            "inventory_throttle_factor must be within (0, 1]"
        );
        anyhow::ensure!(
            self.min_order_notional.is_finite() && self.min_order_notional >= 0.0,
            "min_order_notional must be non-negative"
        );
        anyhow::ensure!(
            positive(self.min_order_quantity),
            "min_order_quantity must be strictly positive"
        );
        anyhow::ensure!(
            self.min_spread.is_finite() && self.min_spread >= 0.0,
            "min_spread must be non-negative"
        );
        anyhow::ensure!(
            self.max_spread_pct > 0.0 && self.max_spread_pct < 1.0,
            "max_spread_pct must be within (0, 1)"
        );
        anyhow::ensure!(
            self.non_crossing_epsilon >= 0.0
                && 2.0 * self.non_crossing_epsilon <= self.max_spread_pct,
            "non_crossing_epsilon must be non-negative and at most half of max_spread_pct"
        );
        anyhow::ensure!(self.leverage > 0, "leverage must be greater than zero");
        anyhow::ensure!(
            self.fill_lookback_secs > 0 && self.fill_fetch_limit > 0,
            "fill_lookback_secs and fill_fetch_limit must be greater than zero"
        );
        anyhow::ensure!(
            self.fill_lookback_secs <= MAX_FILL_LOOKBACK_SECS,
            "fill_lookback_secs must be at most {} (one week)",
            MAX_FILL_LOOKBACK_SECS
        );
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn empty_book_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_book_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Number of base ticks per volatility time unit, `1 / dt`.
    pub fn annualization_ticks(&self) -> f64 {
        1.0 / self.time_step
    }

    pub fn core_params(&self) -> StrategyParams {
        StrategyParams {
            gamma: self.gamma,
            kappa: self.kappa,
            time_horizon: self.time_horizon,
            cycle_seconds: self.cycle_seconds,
            min_time_remaining: self.min_time_remaining,
        }
    }

    pub fn safety_bounds(&self) -> SafetyBounds {
        SafetyBounds {
            min_spread: self.min_spread,
            max_spread_pct: self.max_spread_pct,
            non_crossing_epsilon: self.non_crossing_epsilon,
        }
    }

    /// Constraints used when the exchange cannot report its own.
    pub fn fallback_constraints(&self) -> InstrumentConstraints {
        InstrumentConstraints::new(
            self.min_order_quantity,
            self.quantity_precision,
            self.price_precision,
        )
    }
}

const MAX_SIGMA_LOOKBACK: usize = 100_000;
const MAX_FILL_LOOKBACK_SECS: u64 = 7 * 24 * 3600;

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn override_string(key: &str, field: &mut String) {
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            *field = value;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<T>() {
            *field = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = StrategyConfig::default();
        cfg.validate().unwrap();
        assert!((cfg.annualization_ticks() - 3600.0).abs() < 1e-9);
        assert_eq!(cfg.update_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_nested_strategy_table() {
        let cfg = StrategyConfig::from_toml_str(
            r#"
            [strategy]
            instrument = "ETH/USDT:USDT"
            gamma = 0.01
            kappa = 5.0
            time_horizon = 0.1
            sigma_lookback = 20
            update_interval_ms = 500
            max_spread_pct = 0.002
            fill_lookback_secs = 300
            fill_fetch_limit = 20
            one_way_position_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.instrument, "ETH/USDT:USDT");
        assert_eq!(cfg.sigma_lookback, 20);
        assert_eq!(cfg.fill_lookback_secs, 300);
        assert!(cfg.one_way_position_mode);
        assert_eq!(cfg.leverage, 5);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_top_level_keys() {
        let cfg = StrategyConfig::from_toml_str("gamma = 0.2\nkappa = 2.0\n").unwrap();
        assert_eq!(cfg.gamma, 0.2);
        assert_eq!(cfg.kappa, 2.0);
        assert_eq!(cfg.instrument, default_instrument());
    }

    #[test]
    fn test_rejects_non_positive_gamma_and_kappa() {
        let cfg = StrategyConfig {
            gamma: 0.0,
            ..StrategyConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = StrategyConfig {
            kappa: -1.5,
            ..StrategyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_epsilon_wider_than_cap() {
        let cfg = StrategyConfig {
            max_spread_pct: 0.002,
            non_crossing_epsilon: 0.0015,
            ..StrategyConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("non_crossing_epsilon"));
    }

    #[test]
    fn test_rejects_oversized_windows() {
        let cfg = StrategyConfig {
            fill_lookback_secs: 10_000_000_000_000,
            ..StrategyConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("fill_lookback_secs"));

        let cfg = StrategyConfig {
            fill_lookback_secs: MAX_FILL_LOOKBACK_SECS,
            ..StrategyConfig::default()
        };
        cfg.validate().unwrap();

        let cfg = StrategyConfig {
            sigma_lookback: usize::MAX,
            ..StrategyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_short_lookback_and_empty_instrument() {
        let cfg = StrategyConfig {
            sigma_lookback: 2,
            ..StrategyConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = StrategyConfig {
            instrument: "  ".into(),
            ..StrategyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
