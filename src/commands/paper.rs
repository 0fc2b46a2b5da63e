//! Paper Trading Command
//!
//! Runs the polling loop against CSV candle files with:
//! - Crash recovery from the JSON state file
//! - Graceful shutdown on Ctrl+C (current cycle completes, state is saved)
//! - Optional maximum run time

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::{error, info};

use adaptive_grid::data::CsvCandleSource;
use adaptive_grid::paper::PaperTrader;
use adaptive_grid::state_manager::JsonStateStore;
use adaptive_grid::Config;

use super::load_config;

pub fn run(
    config_path: Option<String>,
    interval: Option<u64>,
    max_duration: Option<u64>,
    state_file: Option<String>,
    replay: bool,
) -> Result<()> {
    dotenv::dotenv().ok();

    let mut config = load_config(config_path.as_deref())?;

    if let Some(interval) = interval {
        config.paper.poll_interval_secs = interval;
    }
    if max_duration.is_some() {
        config.paper.max_duration_secs = max_duration;
    }
    if let Some(state_file) = state_file {
        config.paper.state_file = state_file;
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config, replay))
}

async fn run_async(config: Config, replay: bool) -> Result<()> {
    info!("{}", "=".repeat(60));
    info!("ADAPTIVE GRID - PAPER MODE");
    info!("{}", "=".repeat(60));
    info!(
        "Assets: {}",
        config
            .assets
            .iter()
            .map(|a| a.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("Initial balance per asset: {:.2}", config.paper.initial_balance);
    info!("Cycle interval: {} seconds", config.paper.poll_interval_secs);
    info!("State file: {}", config.paper.state_file);
    info!("{}", "=".repeat(60));

    let files: HashMap<_, _> = config
        .assets
        .iter()
        .map(|a| (a.symbol(), a.csv_file(&config.backtest.data_dir)))
        .collect();
    let mut source = CsvCandleSource::new(files);
    if replay {
        info!("Replaying CSV files one candle per cycle");
        source = source.with_replay();
    }

    let store = JsonStateStore::new(config.paper.state_path());
    let mut trader =
        PaperTrader::new(&config, source, store).context("Failed to initialize paper trader")?;

    let shutdown_flag = trader.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, finishing current cycle...");
                shutdown_flag.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    let cycles = trader
        .run()
        .await
        .context("Paper trading stopped on a fatal error")?;

    info!("Paper trading session ended after {} cycles.", cycles);
    Ok(())
}
