//! Configuration management
//!
//! Loads the typed JSON configuration. Every section and field carries a
//! default, so a partial file (or `{}`) is a valid configuration; unknown keys
//! are ignored. Values are range-checked once by [`Config::validate`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::risk::RiskConfig;
use crate::strategy::StrategyConfig;
use crate::Symbol;

/// Environment variable overriding `paper.state_file`
pub const STATE_FILE_ENV: &str = "ADAPTIVE_GRID_STATE_FILE";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub paper: PaperConfig,
    pub backtest: BacktestConfig,
    pub assets: Vec<AssetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            paper: PaperConfig::default(),
            backtest: BacktestConfig::default(),
            assets: default_assets(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env_overrides();
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Environment values take precedence over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(state_file) = std::env::var(STATE_FILE_ENV) {
            self.paper.state_file = state_file;
        }
    }

    /// Range-check every section
    pub fn validate(&self) -> EngineResult<()> {
        self.strategy
            .validate()
            .map_err(|e| EngineError::Config(format!("strategy: {}", e)))?;
        self.risk
            .validate()
            .map_err(|e| EngineError::Config(format!("risk: {}", e)))?;

        if !(0.0..1.0).contains(&self.execution.fee_rate) {
            return Err(EngineError::Config(format!(
                "execution.fee_rate must be in [0, 1), got {}",
                self.execution.fee_rate
            )));
        }
        if self.paper.initial_balance < 0.0 || self.backtest.initial_balance < 0.0 {
            return Err(EngineError::Config(
                "initial_balance must be non-negative".to_string(),
            ));
        }
        if self.paper.poll_interval_secs == 0 {
            return Err(EngineError::Config(
                "paper.poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.paper.candle_limit == 0 {
            return Err(EngineError::Config(
                "paper.candle_limit must be > 0".to_string(),
            ));
        }
        if self.assets.is_empty() {
            return Err(EngineError::Config("at least one asset is required".to_string()));
        }
        if let Some(asset) = self.assets.iter().find(|a| a.symbol.trim().is_empty()) {
            return Err(EngineError::Config(format!(
                "asset symbol must not be empty (csv_path: {:?})",
                asset.csv_path
            )));
        }

        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.assets.iter().map(|a| a.symbol()).collect()
    }
}

/// Execution cost model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Proportional fee on every fill's notional
    pub fee_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig { fee_rate: 0.001 }
    }
}

/// Paper trading loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Starting balance of each asset's sub-account
    pub initial_balance: f64,
    pub poll_interval_secs: u64,
    pub heartbeat_secs: u64,
    /// Candles fetched per cycle; must cover the longest indicator window
    pub candle_limit: usize,
    /// Stop after this many seconds (runs until Ctrl+C when unset)
    pub max_duration_secs: Option<u64>,
    pub state_file: String,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            initial_balance: 10_000.0,
            poll_interval_secs: 60,
            heartbeat_secs: 10,
            candle_limit: 200,
            max_duration_secs: None,
            state_file: "data/paper_portfolio.json".to_string(),
        }
    }
}

impl PaperConfig {
    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.state_file)
    }
}

/// Backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_balance: f64,
    pub data_dir: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_balance: 10_000.0,
            data_dir: "data".to_string(),
        }
    }
}

/// One traded asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    /// Explicit CSV file; defaults to `<data_dir>/<SYMBOL>.csv` with `/` stripped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<String>,
}

impl AssetConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        AssetConfig {
            symbol: symbol.into(),
            csv_path: None,
        }
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(&self.symbol)
    }

    /// Resolve the CSV file for this asset
    pub fn csv_file(&self, data_dir: impl AsRef<Path>) -> PathBuf {
        match &self.csv_path {
            Some(path) => PathBuf::from(path),
            None => data_dir
                .as_ref()
                .join(format!("{}.csv", self.symbol.replace('/', ""))),
        }
    }
}

pub fn default_assets() -> Vec<AssetConfig> {
    ["BTC/USDT", "ETH/USDT", "BNB/USDT"]
        .into_iter()
        .map(AssetConfig::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.strategy.base_grid_step_pct, 0.01);
        assert_eq!(config.strategy.trend_ma_period, 200);
        assert_eq!(config.risk.max_drawdown_limit, 0.15);
        assert_eq!(config.execution.fee_rate, 0.001);
        assert_eq!(config.paper.poll_interval_secs, 60);
        assert_eq!(config.backtest.initial_balance, 10_000.0);
        assert_eq!(config.assets.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_fall_back() {
        let json = r#"{
            "strategy": { "base_grid_step_pct": 0.02 },
            "risk": { "max_drawdown_limit": 0.1 },
            "assets": [{ "symbol": "SOL/USDT", "csv_path": "data/sol.csv" }],
            "unknown_key": 42
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.strategy.base_grid_step_pct, 0.02);
        assert_eq!(config.strategy.min_atr_period, 14);
        assert_eq!(config.risk.max_drawdown_limit, 0.1);
        assert_eq!(config.risk.fixed_risk_fraction, 0.02);
        assert_eq!(config.symbols(), vec![Symbol::new("SOL/USDT")]);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut config = Config::default();
        config.execution.fee_rate = 1.5;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = Config::default();
        config.risk.max_drawdown_limit = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.assets.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_csv_file_resolution() {
        let asset = AssetConfig::new("BTC/USDT");
        assert_eq!(asset.csv_file("data"), PathBuf::from("data/BTCUSDT.csv"));

        let explicit = AssetConfig {
            symbol: "ETH/USDT".to_string(),
            csv_path: Some("elsewhere/eth.csv".to_string()),
        };
        assert_eq!(explicit.csv_file("data"), PathBuf::from("elsewhere/eth.csv"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "paper": {{ "poll_interval_secs": 5 }} }}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.paper.poll_interval_secs, 5);
        assert_eq!(config.paper.heartbeat_secs, 10);
    }
}
