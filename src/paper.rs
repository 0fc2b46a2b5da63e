//! Paper trading loop
//!
//! Polls a [`CandleSource`] on a fixed cadence and runs every configured asset
//! through its [`GridSession`]. The shutdown flag is only honored at the sleep
//! boundary: the current cycle always completes and the state is persisted
//! before the loop returns.
//!
//! Persistence happens after every cycle and immediately after any fill. A
//! persistence failure (after the store's retries) stops the loop with an
//! error; data problems for one asset only skip that asset for the cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, PaperConfig};
use crate::data::{validate_candles, CandleSource};
use crate::error::EngineResult;
use crate::indicators;
use crate::ledger::{Ledger, PortfolioBook};
use crate::session::GridSession;
use crate::state_manager::JsonStateStore;
use crate::strategy::StrategyConfig;
use crate::{Candle, Symbol};

/// Granularity of the poll sleep; bounds shutdown latency
const SLEEP_TICK: Duration = Duration::from_secs(1);

pub struct PaperTrader<S: CandleSource> {
    paper: PaperConfig,
    strategy: StrategyConfig,
    source: S,
    store: JsonStateStore,
    sessions: Vec<GridSession>,
    /// Persisted records of assets no longer configured, written back untouched
    dormant: PortfolioBook,
    /// Latest candle processed per asset; an identical repeat is not re-run
    last_seen: HashMap<Symbol, Candle>,
    shutdown: Arc<AtomicBool>,
    cycle_count: u64,
    heartbeats: u64,
}

impl<S: CandleSource> PaperTrader<S> {
    /// Build one session per configured asset, resuming persisted accounts
    pub fn new(config: &Config, source: S, store: JsonStateStore) -> EngineResult<Self> {
        let mut book = store.load()?;
        let fee_rate = config.execution.fee_rate;

        let sessions = config
            .symbols()
            .into_iter()
            .map(|symbol| {
                let ledger = match book.remove(&symbol) {
                    Some(state) => {
                        info!(
                            "Resuming {}: balance={:.2}, inventory={:.6}, {} open orders, {} trades",
                            symbol,
                            state.balance,
                            state.inventory,
                            state.active_orders.len(),
                            state.trades.len()
                        );
                        Ledger::from_state(symbol, state, fee_rate)
                    }
                    None => {
                        info!("Starting {} fresh with {:.2}", symbol, config.paper.initial_balance);
                        Ledger::new(symbol, config.paper.initial_balance, fee_rate)
                    }
                };
                GridSession::new(config.strategy.clone(), config.risk.clone().build(), ledger)
            })
            .collect();

        Ok(Self {
            paper: config.paper.clone(),
            strategy: config.strategy.clone(),
            source,
            store,
            sessions,
            dormant: book,
            last_seen: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            cycle_count: 0,
            heartbeats: 0,
        })
    }

    /// Flag that stops the loop at its next sleep boundary
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn sessions(&self) -> &[GridSession] {
        &self.sessions
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats
    }

    /// Full persisted mapping: every session plus dormant records
    pub fn book(&self) -> PortfolioBook {
        let mut book = self.dormant.clone();
        for session in &self.sessions {
            book.insert(session.symbol().clone(), session.portfolio_state());
        }
        book
    }

    pub async fn persist(&self) -> EngineResult<()> {
        self.store.save(&self.book()).await
    }

    pub fn total_equity(&self) -> f64 {
        self.sessions
            .iter()
            .map(|s| {
                let state = s.ledger().state();
                state.equity.unwrap_or(state.balance)
            })
            .sum()
    }

    /// One pass over every asset. Only persistence failures are returned.
    pub async fn run_cycle(&mut self) -> EngineResult<()> {
        self.cycle_count += 1;
        debug!("Cycle {}", self.cycle_count);

        for idx in 0..self.sessions.len() {
            let filled = self.step_asset(idx);
            if filled {
                self.persist().await?;
            }
        }

        self.persist().await
    }

    /// Returns whether anything filled
    fn step_asset(&mut self, idx: usize) -> bool {
        let session = &mut self.sessions[idx];
        let symbol = session.symbol().clone();

        let candles = match self.source.fetch_latest(&symbol, self.paper.candle_limit) {
            Ok(candles) if candles.is_empty() => {
                warn!(symbol = %symbol, "No data returned, skipping cycle");
                return false;
            }
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol = %symbol, "Data fetch failed, skipping cycle: {}", e);
                return false;
            }
        };

        if let Err(e) = validate_candles(&candles) {
            warn!(symbol = %symbol, "Invalid candle window, skipping cycle: {}", e);
            return false;
        }

        // The in-progress candle keeps its timestamp while its range widens
        let latest = &candles[candles.len() - 1];
        if let Some(seen) = self.last_seen.get(&symbol) {
            if seen == latest || seen.datetime > latest.datetime {
                debug!(symbol = %symbol, "No new data since {}", seen.datetime);
                return false;
            }
        }
        self.last_seen.insert(symbol.clone(), latest.clone());

        let snapshot = indicators::latest_snapshot(
            &candles,
            self.strategy.min_atr_period,
            self.strategy.trend_ma_period,
        );
        let outcome = session.step(latest, &snapshot);

        debug!(
            symbol = %symbol,
            price = latest.close,
            equity = format!("{:.2}", outcome.equity),
            drawdown = format!("{:.2}%", outcome.drawdown * 100.0),
            fills = outcome.fills.len(),
            "Cycle complete"
        );

        !outcome.fills.is_empty()
    }

    /// Poll until shutdown is requested or the maximum duration elapses.
    ///
    /// Returns the number of cycles run. Final state is persisted before returning.
    pub async fn run(&mut self) -> EngineResult<u64> {
        let started = Instant::now();
        let max_duration = self.paper.max_duration_secs.map(Duration::from_secs);
        let heartbeat = Duration::from_secs(self.paper.heartbeat_secs.max(1));
        let poll_ticks = self.paper.poll_interval_secs.max(1);
        let mut last_heartbeat = Instant::now();

        let expired = |started: Instant| max_duration.is_some_and(|max| started.elapsed() >= max);

        info!(
            "Starting paper trading loop: {} assets, poll every {}s",
            self.sessions.len(),
            poll_ticks
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            if expired(started) {
                info!("Maximum duration reached, stopping");
                break;
            }

            self.run_cycle().await?;

            for _ in 0..poll_ticks {
                if self.shutdown.load(Ordering::SeqCst) || expired(started) {
                    break;
                }
                sleep(SLEEP_TICK).await;

                if last_heartbeat.elapsed() >= heartbeat {
                    self.heartbeats += 1;
                    info!(
                        "Heartbeat: {} cycles, total equity {:.2}",
                        self.cycle_count,
                        self.total_equity()
                    );
                    last_heartbeat = Instant::now();
                }
            }
        }

        info!("Shutting down, saving final state...");
        self.persist().await?;
        info!(
            "Paper trading stopped after {} cycles. Total equity: {:.2}",
            self.cycle_count,
            self.total_equity()
        );
        Ok(self.cycle_count)
    }
}
