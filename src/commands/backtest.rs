//! Backtest command implementation

use anyhow::Result;
use adaptive_grid::backtest::{BacktestReport, Backtester};
use adaptive_grid::config::AssetConfig;
use adaptive_grid::{data, Symbol};
use tracing::{debug, info};

use super::load_config;

pub fn run(
    config_path: Option<String>,
    symbol_override: Option<String>,
    capital_override: Option<f64>,
    data_dir_override: Option<String>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(config_path.as_deref())?;

    // Apply overrides
    if let Some(symbol) = symbol_override {
        info!("Overriding assets to: {}", symbol);
        config.assets = vec![AssetConfig::new(symbol)];
    }

    if let Some(capital) = capital_override {
        info!("Overriding initial balance to: {:.2}", capital);
        config.backtest.initial_balance = capital;
    }

    if let Some(data_dir) = data_dir_override {
        info!("Overriding data directory to: {}", data_dir);
        config.backtest.data_dir = data_dir;
    }

    config.validate()?;

    let files: Vec<_> = config
        .assets
        .iter()
        .map(|a| (a.symbol(), a.csv_file(&config.backtest.data_dir)))
        .collect();
    debug!("Data files: {:?}", files);

    let datasets = data::load_multi_symbol(&files);
    let report = Backtester::new(&config).run_portfolio(datasets);

    // Print results
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(result) => print_asset(&outcome.symbol, &result.report),
            Err(e) => {
                println!("{}", outcome.symbol);
                println!("  FAILED: {}", e);
            }
        }
        println!("{}", "-".repeat(60));
    }

    let summary = &report.summary;
    println!("PORTFOLIO ({} ok, {} failed)", summary.assets_ok, summary.assets_failed);
    println!("  Initial Balance:    {:.2}", summary.initial_balance);
    println!("  Final Equity:       {:.2}", summary.final_equity);
    println!("  Total Return:       {:.2}%", summary.total_return_pct);
    println!("  Total Trades:       {}", summary.total_trades);
    println!("  Total Fees:         {:.2}", summary.total_fees);
    println!("{}", "=".repeat(60));

    if summary.assets_ok == 0 {
        anyhow::bail!("Backtest failed for every asset");
    }

    info!("Backtest completed successfully");
    Ok(())
}

fn print_asset(symbol: &Symbol, r: &BacktestReport) {
    println!("{}", symbol);
    println!("  Initial Balance:    {:.2}", r.initial_balance);
    println!("  Final Balance:      {:.2}", r.final_balance);
    println!("  Final Inventory:    {:.6}", r.final_inventory);
    println!("  Final Equity:       {:.2}", r.final_equity);
    println!("  Total Return:       {:.2}%", r.total_return_pct);
    println!("  Max Drawdown:       {:.2}%", r.max_drawdown_pct);
    println!(
        "  Total Trades:       {} ({} buys, {} sells)",
        r.total_trades, r.buy_trades, r.sell_trades
    );
    println!("  Total Fees:         {:.2}", r.total_fees);
}
