//! Per-asset trading session
//!
//! Binds one asset's strategy engine, risk manager and ledger and runs the
//! cycle shared by backtest and paper trading:
//!
//! 1. mark to market at the candle close and append the equity point
//! 2. update the risk manager with that equity
//! 3. match orders resting since the previous cycle against this candle's high/low
//! 4. generate a signal (skipped while ATR is undefined)
//! 5. replace the order book, without buys when the risk manager rejects them
//!
//! Orders are always matched against the candle after the one they were
//! priced from.

use tracing::debug;

use crate::indicators::IndicatorSnapshot;
use crate::ledger::{Ledger, PortfolioState};
use crate::risk::RiskManager;
use crate::strategy::{StrategyConfig, StrategyEngine};
use crate::{Candle, GridSignal, Symbol, Trade};

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    /// Equity marked at the candle close, before matching
    pub equity: f64,
    pub drawdown: f64,
    pub fills: Vec<Trade>,
    /// `None` when the grid was left untouched
    pub signal: Option<GridSignal>,
    pub buys_allowed: bool,
}

/// One asset's strategy, risk and account
#[derive(Debug, Clone)]
pub struct GridSession {
    symbol: Symbol,
    strategy: StrategyEngine,
    risk: RiskManager,
    ledger: Ledger,
}

impl GridSession {
    /// The risk manager is owned by this session only: risk is isolated per asset.
    pub fn new(strategy: StrategyConfig, risk: RiskManager, ledger: Ledger) -> Self {
        Self {
            symbol: ledger.symbol().clone(),
            strategy: StrategyEngine::new(strategy),
            risk,
            ledger,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn strategy(&self) -> &StrategyEngine {
        &self.strategy
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Persistable snapshot of the account
    pub fn portfolio_state(&self) -> PortfolioState {
        self.ledger.state().clone()
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Run one full cycle for `candle`
    pub fn step(&mut self, candle: &Candle, indicators: &IndicatorSnapshot) -> CycleOutcome {
        let equity = self.ledger.mark_to_market(candle.datetime, candle.close);
        let drawdown = self.risk.update_account_status(equity);

        let fills = self.ledger.match_orders(candle.high, candle.low, candle.datetime);

        let signal = self
            .strategy
            .generate_signal(candle.close, indicators, &self.risk, equity);

        let mut buys_allowed = false;
        match &signal {
            Some(signal) => {
                let size = signal.suggested_size_per_grid;
                buys_allowed = self.buys_allowed(size);

                let max_buys = self
                    .risk
                    .max_buy_orders(self.ledger.inventory(), size, signal.buy_levels.len());
                if buys_allowed && max_buys < signal.buy_levels.len() {
                    debug!(
                        symbol = %self.symbol,
                        placed = max_buys,
                        requested = signal.buy_levels.len(),
                        "Buy ladder trimmed to exposure cap"
                    );
                    let mut trimmed = signal.clone();
                    trimmed.buy_levels.truncate(max_buys);
                    self.ledger.apply_signal(&trimmed, buys_allowed);
                } else {
                    self.ledger.apply_signal(signal, buys_allowed);
                }
            }
            None => debug!(symbol = %self.symbol, "ATR undefined, grid unchanged"),
        }

        CycleOutcome {
            equity,
            drawdown,
            fills,
            signal,
            buys_allowed,
        }
    }

    fn buys_allowed(&self, size: f64) -> bool {
        if !self.risk.check_trade_allowed() {
            debug!(
                symbol = %self.symbol,
                drawdown = format!("{:.2}%", self.risk.current_drawdown() * 100.0),
                "Drawdown limit reached, buy orders suppressed"
            );
            return false;
        }
        if !self.risk.check_exposure_allowed(self.ledger.inventory(), size) {
            debug!(
                symbol = %self.symbol,
                inventory = self.ledger.inventory(),
                "Exposure cap reached, buy orders suppressed"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskConfig;
    use crate::Side;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: i64, close: f64, wick: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            datetime: start + Duration::hours(i),
            open: close,
            high: close + wick,
            low: close - wick,
            close,
            volume: 1.0,
        }
    }

    fn session(risk: RiskConfig) -> GridSession {
        let ledger = Ledger::new(Symbol::new("BTC/USDT"), 10_000.0, 0.001);
        GridSession::new(StrategyConfig::default(), risk.build(), ledger)
    }

    fn neutral() -> IndicatorSnapshot {
        IndicatorSnapshot {
            atr: Some(2.0),
            sma_trend: Some(100.0),
        }
    }

    #[test]
    fn test_orders_face_the_next_candle() {
        let mut session = session(RiskConfig::default());

        // Wide candle: would touch the first levels if matched immediately
        let first = session.step(&candle(0, 100.0, 5.0), &neutral());
        assert!(first.fills.is_empty());
        assert!(first.signal.is_some());
        assert!(!session.ledger().active_orders().is_empty());

        // Dips through the buy ladder without reaching the first sell at 101
        let second = session.step(&candle(1, 97.0, 2.0), &neutral());
        assert!(!second.fills.is_empty());
        assert!(second.fills.iter().all(|t| t.side == Side::Buy));
    }

    #[test]
    fn test_undefined_atr_keeps_orders() {
        let mut session = session(RiskConfig::default());
        session.step(&candle(0, 100.0, 0.5), &neutral());
        let resting = session.ledger().active_orders().to_vec();

        let outcome = session.step(&candle(1, 100.0, 0.5), &IndicatorSnapshot::default());

        assert!(outcome.signal.is_none());
        assert_eq!(session.ledger().active_orders(), resting.as_slice());
        assert_eq!(session.ledger().equity_curve().len(), 2);
    }

    #[test]
    fn test_exposure_cap_suppresses_buys() {
        let mut session = session(RiskConfig::default().with_max_position_size(1e-6));
        let outcome = session.step(&candle(0, 100.0, 0.5), &neutral());

        assert!(!outcome.buys_allowed);
        assert!(session
            .ledger()
            .active_orders()
            .iter()
            .all(|o| o.side == Side::Sell));
    }

    #[test]
    fn test_exposure_cap_holds_when_candle_sweeps_ladder() {
        // Default sizing gives about 33.3 units per order at ATR 2
        let mut session = session(RiskConfig::default().with_max_position_size(40.0));
        let first = session.step(&candle(0, 100.0, 0.5), &neutral());
        assert!(first.buys_allowed);
        assert!(first.signal.unwrap().buy_levels.len() > 1);

        let resting_buys = session
            .ledger()
            .active_orders()
            .iter()
            .filter(|o| o.side == Side::Buy)
            .count();
        assert_eq!(resting_buys, 1);

        // Falls through every buy level down to 94.5 without touching a sell
        let second = session.step(&candle(1, 96.0, 1.5), &neutral());
        assert_eq!(second.fills.len(), 1);
        assert!(session.ledger().inventory() <= 40.0);
    }

    #[test]
    fn test_bearish_trend_places_no_buys() {
        let mut session = session(RiskConfig::default());
        let bearish = IndicatorSnapshot {
            atr: Some(2.0),
            sma_trend: Some(120.0),
        };
        let outcome = session.step(&candle(0, 100.0, 0.5), &bearish);

        assert!(outcome.signal.unwrap().buy_levels.is_empty());
        assert!(session.ledger().active_orders().iter().all(|o| o.side == Side::Sell));
    }
}
