//! PnL report over the persisted paper portfolio

use anyhow::Result;
use adaptive_grid::state_manager::JsonStateStore;
use tracing::info;

use super::load_config;

pub fn run(config_path: Option<String>, state_file: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let path = state_file.unwrap_or_else(|| config.paper.state_file.clone());
    let store = JsonStateStore::new(&path);

    if !store.path().exists() {
        println!("Error: Portfolio file not found at {}", path);
        return Ok(());
    }

    let book = store.load()?;
    if book.is_empty() {
        println!("Portfolio at {} is empty", path);
        return Ok(());
    }
    info!("Loaded {} assets from {}", book.len(), path);

    let initial_per_asset = config.paper.initial_balance;

    println!("\n{}", "=".repeat(76));
    println!(
        "{:<10} | {:<10} | {:<10} | {:<10} | {:<10} | {:<8}",
        "ASSET", "BALANCE", "HOLDING", "PRICE", "EQUITY", "PnL %"
    );
    println!("{}", "-".repeat(76));

    let mut total_initial = 0.0;
    let mut total_equity = 0.0;

    for (symbol, state) in &book {
        let equity = state.equity.unwrap_or(state.balance);
        let pnl_pct = pnl_pct(initial_per_asset, equity);

        println!(
            "{:<10} | {:<10.2} | {:<10.4} | {:<10.2} | {:<10.2} | {:+.2}%",
            symbol.as_str(),
            state.balance,
            state.inventory,
            state.last_price.unwrap_or(0.0),
            equity,
            pnl_pct
        );

        total_initial += initial_per_asset;
        total_equity += equity;
    }

    println!("{}", "-".repeat(76));
    println!(
        "{:<10} | {:<10} | {:<10} | {:<10} | {:<10.2} | {:+.2}%",
        "TOTAL",
        "",
        "",
        "",
        total_equity,
        pnl_pct(total_initial, total_equity)
    );
    println!("{}\n", "=".repeat(76));

    Ok(())
}

fn pnl_pct(initial: f64, equity: f64) -> f64 {
    if initial > 0.0 {
        (equity - initial) / initial * 100.0
    } else {
        0.0
    }
}
