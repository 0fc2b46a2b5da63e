//! Risk management
//!
//! Tracks drawdown from the equity peak, runs a hysteretic circuit breaker and
//! sizes grid orders from volatility.
//!
//! Position sizing is fixed-fractional on the ATR stop distance:
//! ```text
//! size = (balance * fixed_risk_fraction) / (atr * stop_loss_atr_multiplier)
//! ```
//! so doubling ATR halves the size. While the circuit breaker is active the
//! result is halved again.
//!
//! The breaker switches on once drawdown exceeds 80% of `max_drawdown_limit`
//! and only switches off after drawdown falls below 50% of it. Inside that
//! band the state holds. Independently, `check_trade_allowed` is a hard stop
//! at the full limit.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Side;

/// Drawdown fraction (of the limit) above which the breaker trips
pub const BREAKER_ENGAGE_RATIO: f64 = 0.8;
/// Drawdown fraction (of the limit) below which the breaker resets
pub const BREAKER_RELEASE_RATIO: f64 = 0.5;

/// Configuration for RiskManager using builder pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Hard drawdown stop as a fraction of peak equity
    pub max_drawdown_limit: f64,
    /// Stop distance in ATR units; also the risk-per-unit used for sizing
    pub stop_loss_atr_multiplier: f64,
    /// Fraction of full Kelly reported by `kelly_fraction_for`. Informational.
    pub kelly_fraction: f64,
    /// Cap on inventory units per asset. `None` means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_size: Option<f64>,
    /// Fraction of balance put at risk per grid order
    pub fixed_risk_fraction: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_limit: 0.15,
            stop_loss_atr_multiplier: 3.0,
            kelly_fraction: 0.5,
            max_position_size: None,
            fixed_risk_fraction: 0.02,
        }
    }
}

impl RiskConfig {
    /// Set maximum drawdown threshold for halting
    pub fn with_max_drawdown(mut self, limit: f64) -> Self {
        self.max_drawdown_limit = limit;
        self
    }

    /// Set ATR multiple used for stops and sizing
    pub fn with_stop_loss_atr_multiplier(mut self, multiplier: f64) -> Self {
        self.stop_loss_atr_multiplier = multiplier;
        self
    }

    /// Set risk per order as a fraction (e.g., 0.02 = 2%)
    pub fn with_fixed_risk_fraction(mut self, fraction: f64) -> Self {
        self.fixed_risk_fraction = fraction;
        self
    }

    /// Set maximum inventory units
    pub fn with_max_position_size(mut self, max: f64) -> Self {
        self.max_position_size = Some(max);
        self
    }

    /// Set the Kelly fraction
    pub fn with_kelly_fraction(mut self, fraction: f64) -> Self {
        self.kelly_fraction = fraction;
        self
    }

    /// Check every field is in range
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_drawdown_limit > 0.0 && self.max_drawdown_limit <= 1.0) {
            return Err(format!(
                "max_drawdown_limit must be in (0, 1], got {}",
                self.max_drawdown_limit
            ));
        }
        if !(self.stop_loss_atr_multiplier > 0.0) {
            return Err(format!(
                "stop_loss_atr_multiplier must be positive, got {}",
                self.stop_loss_atr_multiplier
            ));
        }
        if !(self.fixed_risk_fraction > 0.0 && self.fixed_risk_fraction <= 1.0) {
            return Err(format!(
                "fixed_risk_fraction must be in (0, 1], got {}",
                self.fixed_risk_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            return Err(format!(
                "kelly_fraction must be in [0, 1], got {}",
                self.kelly_fraction
            ));
        }
        if let Some(max) = self.max_position_size {
            if !(max > 0.0) {
                return Err(format!("max_position_size must be positive, got {}", max));
            }
        }
        Ok(())
    }

    /// Build the RiskManager
    pub fn build(self) -> RiskManager {
        RiskManager::from_config(self)
    }
}

/// Point-in-time copy of the manager's mutable state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub peak_balance: f64,
    pub current_drawdown: f64,
    pub circuit_breaker_active: bool,
}

/// Per-account risk manager
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    peak_balance: f64,
    current_drawdown: f64,
    circuit_breaker_active: bool,
}

impl RiskManager {
    pub fn from_config(config: RiskConfig) -> Self {
        RiskManager {
            config,
            peak_balance: 0.0,
            current_drawdown: 0.0,
            circuit_breaker_active: false,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> RiskState {
        RiskState {
            peak_balance: self.peak_balance,
            current_drawdown: self.current_drawdown,
            circuit_breaker_active: self.circuit_breaker_active,
        }
    }

    pub fn peak_balance(&self) -> f64 {
        self.peak_balance
    }

    pub fn current_drawdown(&self) -> f64 {
        self.current_drawdown
    }

    pub fn circuit_breaker_active(&self) -> bool {
        self.circuit_breaker_active
    }

    /// Record the latest marked balance, update drawdown and the breaker.
    ///
    /// Returns the current drawdown.
    pub fn update_account_status(&mut self, balance: f64) -> f64 {
        if balance > self.peak_balance {
            self.peak_balance = balance;
        }

        self.current_drawdown = if self.peak_balance <= 0.0 {
            0.0
        } else {
            ((self.peak_balance - balance) / self.peak_balance).clamp(0.0, 1.0)
        };

        let limit = self.config.max_drawdown_limit;
        if !self.circuit_breaker_active && self.current_drawdown > BREAKER_ENGAGE_RATIO * limit {
            self.circuit_breaker_active = true;
            warn!(
                drawdown = format!("{:.2}%", self.current_drawdown * 100.0),
                peak = format!("{:.2}", self.peak_balance),
                "Circuit breaker ENGAGED, sizing halved"
            );
        } else if self.circuit_breaker_active
            && self.current_drawdown < BREAKER_RELEASE_RATIO * limit
        {
            self.circuit_breaker_active = false;
            info!(
                drawdown = format!("{:.2}%", self.current_drawdown * 100.0),
                "Circuit breaker released, sizing restored"
            );
        }

        self.current_drawdown
    }

    /// Units per grid order for the given balance and volatility
    pub fn calculate_position_size(&self, balance: f64, atr: f64, price: f64) -> f64 {
        let risk_budget = balance * self.config.fixed_risk_fraction;
        let risk_per_unit = atr * self.config.stop_loss_atr_multiplier;

        if risk_per_unit <= 0.0 || !risk_per_unit.is_finite() {
            return 0.0;
        }

        let mut size = (risk_budget / risk_per_unit).max(0.0);
        if self.circuit_breaker_active {
            size *= 0.5;
        }

        debug!(
            budget = format!("{:.2}", risk_budget),
            risk_per_unit = format!("{:.4}", risk_per_unit),
            size = format!("{:.6}", size),
            notional = format!("{:.2}", size * price),
            breaker = self.circuit_breaker_active,
            "Position size"
        );

        size
    }

    /// Hard kill switch: false once drawdown reaches the full limit
    pub fn check_trade_allowed(&self) -> bool {
        if self.current_drawdown >= self.config.max_drawdown_limit {
            debug!(
                drawdown = format!("{:.2}%", self.current_drawdown * 100.0),
                limit = format!("{:.2}%", self.config.max_drawdown_limit * 100.0),
                "Max drawdown reached, new buys rejected"
            );
            return false;
        }
        true
    }

    /// Would adding `trade_size` units keep inventory within `max_position_size`?
    pub fn check_exposure_allowed(&self, current_inventory: f64, trade_size: f64) -> bool {
        match self.config.max_position_size {
            Some(max) if current_inventory + trade_size > max => {
                debug!(
                    inventory = current_inventory,
                    trade_size, max, "Max position size would be exceeded"
                );
                false
            }
            _ => true,
        }
    }

    /// How many of `requested` buy orders of `order_size` may rest at once so
    /// that inventory stays within `max_position_size` even if all of them fill
    pub fn max_buy_orders(&self, current_inventory: f64, order_size: f64, requested: usize) -> usize {
        let Some(max) = self.config.max_position_size else {
            return requested;
        };
        if !(order_size > 0.0) || !order_size.is_finite() {
            return requested;
        }

        let headroom = (max - current_inventory).max(0.0);
        let fit = (headroom / order_size).floor();
        if fit >= requested as f64 {
            requested
        } else {
            fit as usize
        }
    }

    /// ATR stop: below entry for longs, above entry for shorts
    pub fn get_adaptive_stop_loss(&self, entry_price: f64, atr: f64, side: Side) -> f64 {
        let distance = atr * self.config.stop_loss_atr_multiplier;
        match side {
            Side::Buy => entry_price - distance,
            Side::Sell => entry_price + distance,
        }
    }

    /// Fractional Kelly bet size: `max(0, kelly * kelly_fraction)` with
    /// `kelly = (p(b + 1) - 1) / b`. Reported only; grid sizing ignores it.
    pub fn kelly_fraction_for(&self, win_prob: f64, win_loss_ratio: f64) -> f64 {
        if win_loss_ratio <= 0.0 {
            return 0.0;
        }
        let kelly = (win_prob * (win_loss_ratio + 1.0) - 1.0) / win_loss_ratio;
        (kelly * self.config.kelly_fraction).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn manager() -> RiskManager {
        RiskConfig::default().build()
    }

    #[test]
    fn test_drawdown_calculation() {
        let mut rm = manager();

        assert_eq!(rm.update_account_status(100_000.0), 0.0);
        assert_relative_eq!(rm.update_account_status(90_000.0), 0.10);
        assert_eq!(rm.update_account_status(110_000.0), 0.0);
        assert_eq!(rm.peak_balance(), 110_000.0);
    }

    #[test]
    fn test_zero_peak_has_no_drawdown() {
        let mut rm = manager();
        assert_eq!(rm.update_account_status(0.0), 0.0);
        assert!(!rm.circuit_breaker_active());
    }

    #[test]
    fn test_breaker_hysteresis() {
        // limit 15%: engage above 12%, release below 7.5%
        let mut rm = manager();
        rm.update_account_status(10_000.0);

        rm.update_account_status(8_850.0); // 11.5%
        assert!(!rm.circuit_breaker_active());

        rm.update_account_status(8_750.0); // 12.5%
        assert!(rm.circuit_breaker_active());

        rm.update_account_status(9_100.0); // 9%, inside band
        assert!(rm.circuit_breaker_active());

        rm.update_account_status(9_300.0); // 7%
        assert!(!rm.circuit_breaker_active());

        rm.update_account_status(8_900.0); // 11%, inside band from below
        assert!(!rm.circuit_breaker_active());
    }

    #[test]
    fn test_inverse_volatility_sizing() {
        let mut rm = manager();
        rm.update_account_status(10_000.0);

        let size_normal = rm.calculate_position_size(10_000.0, 10.0, 1000.0);
        let size_high = rm.calculate_position_size(10_000.0, 20.0, 1000.0);

        // 10,000 * 0.02 / (10 * 3)
        assert_relative_eq!(size_normal, 200.0 / 30.0);
        assert_relative_eq!(size_high / size_normal, 0.5);
    }

    #[test]
    fn test_breaker_halves_size() {
        let mut rm = manager();
        rm.update_account_status(10_000.0);
        let before = rm.calculate_position_size(10_000.0, 20.0, 1000.0);

        rm.update_account_status(8_500.0); // 15% drawdown
        assert!(rm.circuit_breaker_active());
        let after = rm.calculate_position_size(10_000.0, 20.0, 1000.0);

        assert_relative_eq!(after, before * 0.5);
    }

    #[test]
    fn test_zero_atr_gives_zero_size() {
        let rm = manager();
        assert_eq!(rm.calculate_position_size(10_000.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn test_kill_switch() {
        let mut rm = manager();
        rm.update_account_status(10_000.0);
        assert!(rm.check_trade_allowed());

        rm.update_account_status(8_600.0); // 14%
        assert!(rm.check_trade_allowed());

        rm.update_account_status(8_500.0); // exactly 15%
        assert!(!rm.check_trade_allowed());
    }

    #[test]
    fn test_adaptive_stop_loss() {
        let rm = manager();
        assert_eq!(rm.get_adaptive_stop_loss(1000.0, 10.0, Side::Buy), 970.0);
        assert_eq!(rm.get_adaptive_stop_loss(1000.0, 10.0, Side::Sell), 1030.0);
    }

    #[test]
    fn test_exposure_cap() {
        let rm = RiskConfig::default().with_max_position_size(5.0).build();
        assert!(rm.check_exposure_allowed(3.0, 2.0));
        assert!(!rm.check_exposure_allowed(3.5, 2.0));

        let unlimited = manager();
        assert!(unlimited.check_exposure_allowed(1e9, 1e9));
    }

    #[test]
    fn test_max_buy_orders_bounds_full_ladder() {
        let rm = RiskConfig::default().with_max_position_size(10.0).build();
        assert_eq!(rm.max_buy_orders(0.0, 3.0, 10), 3);
        assert_eq!(rm.max_buy_orders(4.0, 3.0, 10), 2);
        assert_eq!(rm.max_buy_orders(9.0, 3.0, 10), 0);
        assert_eq!(rm.max_buy_orders(12.0, 3.0, 10), 0);
        assert_eq!(rm.max_buy_orders(0.0, 1.0, 4), 4);

        assert_eq!(manager().max_buy_orders(1e9, 1e9, 7), 7);
    }

    #[test]
    fn test_half_kelly() {
        let rm = manager();
        // p = 0.55, b = 1 => kelly 10%, half-kelly 5%
        assert_relative_eq!(rm.kelly_fraction_for(0.55, 1.0), 0.05, epsilon = 1e-12);
        assert_eq!(rm.kelly_fraction_for(0.3, 1.0), 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(RiskConfig::default().validate().is_ok());
        assert!(RiskConfig::default().with_max_drawdown(0.0).validate().is_err());
        assert!(RiskConfig::default().with_fixed_risk_fraction(1.5).validate().is_err());
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let cfg: RiskConfig = serde_json::from_str(r#"{"max_drawdown_limit": 0.2}"#).unwrap();
        assert_eq!(cfg.max_drawdown_limit, 0.2);
        assert_eq!(cfg.fixed_risk_fraction, 0.02);
        assert_eq!(cfg.stop_loss_atr_multiplier, 3.0);
        assert_eq!(cfg.max_position_size, None);
    }
}
