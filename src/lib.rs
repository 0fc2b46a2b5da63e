//! Adaptive Grid
//!
//! A volatility-adaptive grid trading engine: ATR-scaled order ladders gated
//! by an SMA trend filter, drawdown-aware position sizing with a hysteretic
//! circuit breaker, and a limit-order matching ledger shared by backtesting
//! and paper trading.

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod paper;
pub mod risk;
pub mod session;
pub mod state_manager;
pub mod strategy;
pub mod types;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use types::*;
