//! Volatility-adaptive grid strategy
//!
//! Turns a price + indicator snapshot into a ladder of buy/sell levels whose
//! spacing "breathes" with ATR, gated by an SMA trend filter:
//!
//! 1. Classify trend: price above SMA is bullish, below is bearish
//! 2. Scale the base step by `max(0.5, atr / base_atr)`
//! 3. Lay levels out from the price in both directions, inside a ±10% band
//! 4. In a bearish trend, drop the buy side (long-only safety filter)
//! 5. Ask the risk manager for the size per level
//!
//! The engine never talks to a venue; it emits a [`GridSignal`] for the ledger.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::IndicatorSnapshot;
use crate::risk::RiskManager;
use crate::{GridSignal, SignalAction, Trend};

/// Lower bound on the volatility factor
pub const MIN_VOL_FACTOR: f64 = 0.5;
/// Buy levels stay strictly above `price * GRID_LOWER_BOUND`
pub const GRID_LOWER_BOUND: f64 = 0.90;
/// Sell levels stay strictly below `price * GRID_UPPER_BOUND`
pub const GRID_UPPER_BOUND: f64 = 1.10;
/// Reference ATR as a fraction of price when none is supplied
pub const DEFAULT_BASE_ATR_PCT: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Nominal ladder size. Informational: the ±10% band bounds the ladder.
    pub grid_levels: usize,
    /// Grid step as a fraction of price before volatility scaling
    pub base_grid_step_pct: f64,
    /// SMA window for the trend filter
    pub trend_ma_period: usize,
    /// ATR window
    pub min_atr_period: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            grid_levels: 20,
            base_grid_step_pct: 0.01,
            trend_ma_period: 200,
            min_atr_period: 14,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_grid_step_pct > 0.0 && self.base_grid_step_pct < 1.0) {
            return Err(format!(
                "base_grid_step_pct must be in (0, 1), got {}",
                self.base_grid_step_pct
            ));
        }
        if self.trend_ma_period == 0 {
            return Err("trend_ma_period must be at least 1".to_string());
        }
        if self.min_atr_period == 0 {
            return Err("min_atr_period must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Levels produced by one grid computation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridLayout {
    pub step: f64,
    /// Descending from `price - step`
    pub buy_levels: Vec<f64>,
    /// Ascending from `price + step`
    pub sell_levels: Vec<f64>,
}

impl GridLayout {
    pub fn total_levels(&self) -> usize {
        self.buy_levels.len() + self.sell_levels.len()
    }
}

/// Classify trend against the SMA filter; an undefined SMA is neutral
pub fn determine_trend(price: f64, sma: Option<f64>) -> Trend {
    match sma {
        Some(sma) if price > sma => Trend::Bullish,
        Some(sma) if price < sma => Trend::Bearish,
        _ => Trend::Neutral,
    }
}

/// Compute the volatility-scaled ladder around `price`.
///
/// `base_atr` defaults to 2% of price. Levels accumulate by repeated
/// subtraction/addition of the step.
pub fn dynamic_grid(price: f64, atr: f64, base_atr: Option<f64>, base_step_pct: f64) -> GridLayout {
    if !(price > 0.0) || !price.is_finite() || !atr.is_finite() {
        return GridLayout::default();
    }

    let base_atr = match base_atr {
        Some(b) if b > 0.0 => b,
        _ => price * DEFAULT_BASE_ATR_PCT,
    };

    let vol_factor = (atr / base_atr).max(MIN_VOL_FACTOR);
    let step = price * base_step_pct * vol_factor;
    if !(step > 0.0) || !step.is_finite() {
        return GridLayout::default();
    }

    let lower_limit = price * GRID_LOWER_BOUND;
    let upper_limit = price * GRID_UPPER_BOUND;

    let mut buy_levels = Vec::new();
    let mut level = price - step;
    while level > lower_limit {
        buy_levels.push(level);
        level -= step;
    }

    let mut sell_levels = Vec::new();
    let mut level = price + step;
    while level < upper_limit {
        sell_levels.push(level);
        level += step;
    }

    GridLayout {
        step,
        buy_levels,
        sell_levels,
    }
}

/// Per-asset strategy state: the latest ladder and trend
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    config: StrategyConfig,
    grid_buy_orders: Vec<f64>,
    grid_sell_orders: Vec<f64>,
    current_trend: Trend,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            grid_buy_orders: Vec::new(),
            grid_sell_orders: Vec::new(),
            current_trend: Trend::Neutral,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn current_trend(&self) -> Trend {
        self.current_trend
    }

    pub fn grid_buy_orders(&self) -> &[f64] {
        &self.grid_buy_orders
    }

    pub fn grid_sell_orders(&self) -> &[f64] {
        &self.grid_sell_orders
    }

    pub fn determine_trend(&self, price: f64, sma: Option<f64>) -> Trend {
        determine_trend(price, sma)
    }

    /// Regenerate the ladder, fully replacing the previous one
    pub fn calculate_dynamic_grid(&mut self, price: f64, atr: f64, base_atr: Option<f64>) -> GridLayout {
        let layout = dynamic_grid(price, atr, base_atr, self.config.base_grid_step_pct);
        self.grid_buy_orders = layout.buy_levels.clone();
        self.grid_sell_orders = layout.sell_levels.clone();
        layout
    }

    /// Main decision function.
    ///
    /// Returns `None` while ATR is undefined: no grid update this cycle.
    /// `balance` is the marked equity the size is budgeted against.
    pub fn generate_signal(
        &mut self,
        price: f64,
        indicators: &IndicatorSnapshot,
        risk: &RiskManager,
        balance: f64,
    ) -> Option<GridSignal> {
        let atr = indicators.atr.filter(|a| a.is_finite())?;

        self.current_trend = determine_trend(price, indicators.sma_trend);
        let layout = self.calculate_dynamic_grid(price, atr, None);

        let allow_buys = self.current_trend != Trend::Bearish;
        let size = risk.calculate_position_size(balance, atr, price);

        debug!(
            price = format!("{:.2}", price),
            trend = %self.current_trend,
            atr = format!("{:.4}", atr),
            step = format!("{:.4}", layout.step),
            buys = if allow_buys { layout.buy_levels.len() } else { 0 },
            sells = layout.sell_levels.len(),
            size = format!("{:.6}", size),
            "Grid regenerated"
        );
        if !allow_buys {
            debug!("Trend is bearish, buy grid paused");
        }

        Some(GridSignal {
            action: SignalAction::UpdateGrid,
            buy_levels: if allow_buys { layout.buy_levels } else { Vec::new() },
            sell_levels: layout.sell_levels,
            suggested_size_per_grid: size,
            trend: self.current_trend,
        })
    }
}
