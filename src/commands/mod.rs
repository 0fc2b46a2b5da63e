//! CLI command implementations

pub mod backtest;
pub mod paper;
pub mod pnl;

use adaptive_grid::Config;
use anyhow::{Context, Result};
use tracing::info;

/// Load the config file, or the built-in defaults when no path is given
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            info!("Loaded configuration from: {}", path);
            Ok(config)
        }
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate().context("Invalid default configuration")?;
            info!("No config file given, using defaults");
            Ok(config)
        }
    }
}
