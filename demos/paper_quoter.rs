//! Runs the quoting loop against an in-memory paper venue.
//!
//! Config is read from `config.toml` when present (nested `[strategy]` table
//! or top-level keys), otherwise defaults are used. `AVELLANEDA_*` env vars
//! override either. Stop with Ctrl-C; open orders are cancelled before exit.
//!
//! ```text
//! RUST_LOG=info cargo run --example paper_quoter
//! ```

use anyhow::Result;
use as_quoter::{PaperExchange, StrategyConfig, StrategyScheduler, TopOfBook};
use std::{path::Path, sync::Arc};
use tokio::sync::watch;
use tracing::{info, warn};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = if Path::new(CONFIG_PATH).exists() {
        StrategyConfig::from_file(CONFIG_PATH)?
    } else {
        info!("{} not found; using built-in defaults", CONFIG_PATH);
        StrategyConfig::from_env()?
    };

    let starting_mid = std::env::var("PAPER_MID")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|mid| *mid > 0.0)
        .unwrap_or(0.5);
    let half_width = starting_mid * 0.0002;
    let venue = Arc::new(
        PaperExchange::new(
            config.instrument.clone(),
            TopOfBook::new(starting_mid - half_width, starting_mid + half_width),
        )
        .with_constraints(config.fallback_constraints())
        .with_balance(config.quote_asset.clone(), 1_000.0)
        .with_fee_rate(0.0002)
        .with_random_walk(5.0),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received; draining"),
            Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut scheduler = StrategyScheduler::new(config, venue)?;
    let metrics = scheduler.run(shutdown_rx).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

fn init_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .finish(),
    )
    .is_err()
    {
        // Tracing already initialised elsewhere.
    }
}
