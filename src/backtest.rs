//! Backtesting engine
//!
//! Replays an ordered candle series once through a [`GridSession`] and
//! summarizes the equity curve and fills. Multi-asset runs execute each asset
//! independently (in parallel) and keep one explicit result per asset.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

use crate::data::validate_candles;
use crate::error::{EngineError, EngineResult};
use crate::indicators::{self, IndicatorSnapshot};
use crate::ledger::Ledger;
use crate::risk::RiskConfig;
use crate::session::GridSession;
use crate::strategy::StrategyConfig;
use crate::{Candle, Config, EquityPoint, Side, Symbol, Trade};

/// Backtest engine
#[derive(Debug, Clone)]
pub struct Backtester {
    strategy: StrategyConfig,
    risk: RiskConfig,
    fee_rate: f64,
    initial_balance: f64,
}

impl Backtester {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            config.strategy.clone(),
            config.risk.clone(),
            config.execution.fee_rate,
            config.backtest.initial_balance,
        )
    }

    pub fn from_parts(
        strategy: StrategyConfig,
        risk: RiskConfig,
        fee_rate: f64,
        initial_balance: f64,
    ) -> Self {
        Backtester {
            strategy,
            risk,
            fee_rate,
            initial_balance,
        }
    }

    /// Validate the series, compute indicators and replay it
    pub fn run(&self, symbol: &Symbol, candles: &[Candle]) -> EngineResult<BacktestResult> {
        let snapshots = indicators::annotate(
            candles,
            self.strategy.min_atr_period,
            self.strategy.trend_ma_period,
        );
        self.run_with_indicators(symbol, candles, &snapshots)
    }

    /// Replay with caller-supplied indicators aligned with `candles`
    pub fn run_with_indicators(
        &self,
        symbol: &Symbol,
        candles: &[Candle],
        snapshots: &[IndicatorSnapshot],
    ) -> EngineResult<BacktestResult> {
        if candles.is_empty() {
            return Err(EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "empty candle series".to_string(),
            });
        }
        if snapshots.len() != candles.len() {
            return Err(EngineError::IndicatorMismatch {
                candles: candles.len(),
                indicators: snapshots.len(),
            });
        }
        validate_candles(candles)?;

        info!(
            symbol = %symbol,
            candles = candles.len(),
            "Running backtest from {} to {}",
            candles[0].datetime,
            candles[candles.len() - 1].datetime
        );

        let ledger = Ledger::new(symbol.clone(), self.initial_balance, self.fee_rate);
        let mut session = GridSession::new(self.strategy.clone(), self.risk.clone().build(), ledger);

        for (candle, snapshot) in candles.iter().zip(snapshots) {
            session.step(candle, snapshot);
        }

        let last_close = candles[candles.len() - 1].close;
        let ledger = session.into_ledger();
        let report = BacktestReport::from_ledger(&ledger, self.initial_balance, last_close);

        info!(
            symbol = %symbol,
            trades = report.total_trades,
            "Backtest finished: return {:.2}%, max drawdown {:.2}%",
            report.total_return_pct,
            report.max_drawdown_pct
        );

        Ok(BacktestResult {
            report,
            trades: ledger.trades().to_vec(),
            equity_curve: ledger.equity_curve().to_vec(),
        })
    }

    /// Backtest every asset independently.
    ///
    /// Load failures passed in stay failures; nothing is dropped, and the
    /// aggregate only covers assets that succeeded.
    pub fn run_portfolio(
        &self,
        datasets: Vec<(Symbol, EngineResult<Vec<Candle>>)>,
    ) -> PortfolioReport {
        info!("Backtesting {} assets", datasets.len());

        let outcomes: Vec<AssetOutcome> = datasets
            .into_par_iter()
            .map(|(symbol, data)| {
                let result = data.and_then(|candles| self.run(&symbol, &candles));
                if let Err(e) = &result {
                    error!(symbol = %symbol, "Backtest failed: {}", e);
                }
                AssetOutcome { symbol, result }
            })
            .collect();

        let summary = PortfolioSummary::from_outcomes(&outcomes);
        PortfolioReport { outcomes, summary }
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub report: BacktestReport,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Summary statistics of one asset's replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub symbol: Symbol,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub final_inventory: f64,
    /// Balance plus inventory marked at the last close
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub total_fees: f64,
    pub cycles: usize,
}

impl BacktestReport {
    pub fn from_ledger(ledger: &Ledger, initial_balance: f64, last_close: f64) -> Self {
        let trades = ledger.trades();
        let final_equity = ledger.state().equity_at(last_close);
        let buy_trades = trades.iter().filter(|t| t.side == Side::Buy).count();

        BacktestReport {
            symbol: ledger.symbol().clone(),
            initial_balance,
            final_balance: ledger.balance(),
            final_inventory: ledger.inventory(),
            final_equity,
            total_return_pct: return_pct(initial_balance, final_equity),
            max_drawdown_pct: max_drawdown(ledger.equity_curve()) * 100.0,
            total_trades: trades.len(),
            buy_trades,
            sell_trades: trades.len() - buy_trades,
            total_fees: trades.iter().map(|t| t.fee).sum(),
            cycles: ledger.equity_curve().len(),
        }
    }
}

/// Largest peak-to-trough decline of the curve, as a fraction
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd: f64 = 0.0;

    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
    }

    max_dd
}

fn return_pct(initial: f64, final_value: f64) -> f64 {
    if initial > 0.0 {
        (final_value - initial) / initial * 100.0
    } else {
        0.0
    }
}

/// One asset's backtest, success or failure
#[derive(Debug)]
pub struct AssetOutcome {
    pub symbol: Symbol,
    pub result: EngineResult<BacktestResult>,
}

#[derive(Debug)]
pub struct PortfolioReport {
    pub outcomes: Vec<AssetOutcome>,
    pub summary: PortfolioSummary,
}

/// Aggregate over the assets that completed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub assets_ok: usize,
    pub assets_failed: usize,
    pub initial_balance: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub total_fees: f64,
}

impl PortfolioSummary {
    pub fn from_outcomes(outcomes: &[AssetOutcome]) -> Self {
        let mut summary = PortfolioSummary::default();

        for outcome in outcomes {
            match &outcome.result {
                Ok(result) => {
                    let r = &result.report;
                    summary.assets_ok += 1;
                    summary.initial_balance += r.initial_balance;
                    summary.final_equity += r.final_equity;
                    summary.total_trades += r.total_trades;
                    summary.total_fees += r.total_fees;
                }
                Err(_) => summary.assets_failed += 1,
            }
        }

        summary.total_return_pct = return_pct(summary.initial_balance, summary.final_equity);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn point(i: i64, equity: f64) -> EquityPoint {
        EquityPoint {
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i),
            equity,
        }
    }

    fn flat_candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let price = 100.0 + (i as f64 * 0.5).sin() * 3.0;
                Candle::new(
                    start + Duration::hours(i as i64),
                    price,
                    price + 1.0,
                    price - 1.0,
                    price,
                    5.0,
                )
                .unwrap()
            })
            .collect()
    }

    fn backtester() -> Backtester {
        let strategy = StrategyConfig {
            trend_ma_period: 20,
            ..StrategyConfig::default()
        };
        Backtester::from_parts(strategy, RiskConfig::default(), 0.001, 10_000.0)
    }

    #[test]
    fn test_max_drawdown() {
        let curve = vec![point(0, 100.0), point(1, 120.0), point(2, 90.0), point(3, 130.0), point(4, 117.0)];
        assert_relative_eq!(max_drawdown(&curve), 0.25);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_report_accounting() {
        let result = backtester().run(&Symbol::new("BTC/USDT"), &flat_candles(120)).unwrap();
        let r = &result.report;

        assert_eq!(r.cycles, 120);
        assert_eq!(result.equity_curve.len(), 120);
        assert_eq!(r.total_trades, r.buy_trades + r.sell_trades);
        assert_eq!(r.total_trades, result.trades.len());
        assert!(r.final_balance >= 0.0 && r.final_inventory >= 0.0);
        assert_relative_eq!(
            r.total_return_pct,
            (r.final_equity - 10_000.0) / 10_000.0 * 100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_invalid_series_rejected() {
        let mut candles = flat_candles(30);
        candles.swap(10, 11);

        assert!(matches!(
            backtester().run(&Symbol::new("BTC/USDT"), &candles),
            Err(EngineError::InvalidCandle { index: 11, .. })
        ));
    }

    #[test]
    fn test_empty_series_rejected() {
        assert!(matches!(
            backtester().run(&Symbol::new("BTC/USDT"), &[]),
            Err(EngineError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn test_portfolio_keeps_failures_out_of_aggregate() {
        let datasets = vec![
            (Symbol::new("BTC/USDT"), Ok(flat_candles(60))),
            (
                Symbol::new("ETH/USDT"),
                Err(EngineError::DataUnavailable {
                    symbol: "ETH/USDT".to_string(),
                    reason: "missing".to_string(),
                }),
            ),
            (Symbol::new("BNB/USDT"), Ok(flat_candles(60))),
        ];

        let report = backtester().run_portfolio(datasets);

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.summary.assets_ok, 2);
        assert_eq!(report.summary.assets_failed, 1);
        assert_relative_eq!(report.summary.initial_balance, 20_000.0);
        let failed = report.outcomes.iter().find(|o| o.result.is_err()).unwrap();
        assert_eq!(failed.symbol, Symbol::new("ETH/USDT"));
    }
}
