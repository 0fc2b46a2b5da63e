//! Adaptive grid - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Replay CSV history for every configured asset
//! - paper: Run the paper trading loop
//! - pnl: Print the PnL of the persisted paper portfolio

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "adaptive-grid")]
#[command(about = "Volatility-adaptive grid trading with backtesting and paper trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run grid backtest over CSV history
    Backtest {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Backtest a single symbol instead of the configured assets
        #[arg(short, long)]
        symbol: Option<String>,

        /// Initial balance per asset
        #[arg(long)]
        capital: Option<f64>,

        /// Directory holding <SYMBOL>.csv files
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Run paper trading
    Paper {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Cycle interval in seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many seconds
        #[arg(long)]
        max_duration: Option<u64>,

        /// State file path
        #[arg(long)]
        state_file: Option<String>,

        /// Step through the CSV files one candle per cycle instead of tailing them
        #[arg(long)]
        replay: bool,
    },

    /// Show PnL of the paper portfolio
    Pnl {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// State file path
        #[arg(long)]
        state_file: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // File appender
    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Paper { .. } => "paper",
        Commands::Pnl { .. } => "pnl",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            symbol,
            capital,
            data_dir,
        } => commands::backtest::run(config, symbol, capital, data_dir),

        Commands::Paper {
            config,
            interval,
            max_duration,
            state_file,
            replay,
        } => commands::paper::run(config, interval, max_duration, state_file, replay),

        Commands::Pnl { config, state_file } => commands::pnl::run(config, state_file),
    }
}
