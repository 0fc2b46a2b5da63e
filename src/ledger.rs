//! Matching / ledger engine
//!
//! Shared by backtest and paper trading. Holds one asset's spot account
//! (balance, inventory, resting orders, fills) and fills resting limit orders
//! against a candle's high/low.
//!
//! Order management is cancel-all-replace-all: every applied signal discards
//! all unfilled orders, so a partially consumed ladder loses its remaining
//! orders at the next regeneration.
//!
//! Fill rules (no slippage, no partial fills, fixed proportional fee):
//! - buy fills iff `low <= price` and `balance >= price * size * (1 + fee_rate)`
//! - sell fills iff `high >= price` and `inventory >= size`
//!
//! An order that touches its price but cannot be funded stays pending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::{EquityPoint, GridSignal, Order, Side, Symbol, Trade};

/// Persisted per-asset account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub balance: f64,
    pub inventory: f64,
    #[serde(default)]
    pub active_orders: Vec<Order>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    /// Last mark price seen, for offline PnL reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
    /// Equity at `last_price`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equity: Option<f64>,
}

impl PortfolioState {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            inventory: 0.0,
            active_orders: Vec::new(),
            trades: Vec::new(),
            last_price: None,
            equity: None,
        }
    }

    /// Equity at the given mark: `balance + inventory * mark`
    pub fn equity_at(&self, mark_price: f64) -> f64 {
        self.balance + self.inventory * mark_price
    }
}

/// Symbol → account mapping, the unit of persistence
pub type PortfolioBook = BTreeMap<Symbol, PortfolioState>;

/// One asset's account plus its equity history
#[derive(Debug, Clone)]
pub struct Ledger {
    symbol: Symbol,
    state: PortfolioState,
    fee_rate: f64,
    equity_curve: Vec<EquityPoint>,
}

impl Ledger {
    pub fn new(symbol: Symbol, initial_balance: f64, fee_rate: f64) -> Self {
        Self::from_state(symbol, PortfolioState::new(initial_balance), fee_rate)
    }

    /// Resume from a persisted record
    pub fn from_state(symbol: Symbol, state: PortfolioState, fee_rate: f64) -> Self {
        Self {
            symbol,
            state,
            fee_rate,
            equity_curve: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn balance(&self) -> f64 {
        self.state.balance
    }

    pub fn inventory(&self) -> f64 {
        self.state.inventory
    }

    pub fn active_orders(&self) -> &[Order] {
        &self.state.active_orders
    }

    pub fn trades(&self) -> &[Trade] {
        &self.state.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    /// Mark the account at `price`, append the equity point and return equity
    pub fn mark_to_market(&mut self, datetime: DateTime<Utc>, price: f64) -> f64 {
        let equity = self.state.equity_at(price);
        self.state.last_price = Some(price);
        self.state.equity = Some(equity);
        self.equity_curve.push(EquityPoint { datetime, equity });
        equity
    }

    /// Discard every resting order and materialize the signal's ladder.
    ///
    /// With `allow_buys == false` only the sell side is placed. A zero size
    /// places nothing. Returns the number of orders now resting.
    pub fn apply_signal(&mut self, signal: &GridSignal, allow_buys: bool) -> usize {
        let cancelled = self.state.active_orders.len();
        self.state.active_orders.clear();

        let size = signal.suggested_size_per_grid;
        if size > 0.0 && size.is_finite() {
            if allow_buys {
                self.state
                    .active_orders
                    .extend(signal.buy_levels.iter().map(|&price| Order {
                        side: Side::Buy,
                        price,
                        size,
                    }));
            }
            self.state
                .active_orders
                .extend(signal.sell_levels.iter().map(|&price| Order {
                    side: Side::Sell,
                    price,
                    size,
                }));
        }

        debug!(
            symbol = %self.symbol,
            cancelled,
            placed = self.state.active_orders.len(),
            "Order book replaced"
        );
        self.state.active_orders.len()
    }

    /// Fill resting orders against one observation's extremes.
    ///
    /// Orders are visited in book order; each fill immediately updates the
    /// balance/inventory seen by later orders. Returns the new fills.
    pub fn match_orders(&mut self, high: f64, low: f64, time: DateTime<Utc>) -> Vec<Trade> {
        let orders = std::mem::take(&mut self.state.active_orders);
        let mut remaining = Vec::with_capacity(orders.len());
        let mut fills = Vec::new();

        for order in orders {
            match self.try_fill(&order, high, low, time) {
                Some(trade) => fills.push(trade),
                None => remaining.push(order),
            }
        }

        self.state.active_orders = remaining;
        self.state.trades.extend(fills.iter().cloned());
        fills
    }

    fn try_fill(&mut self, order: &Order, high: f64, low: f64, time: DateTime<Utc>) -> Option<Trade> {
        let notional = order.price * order.size;
        let fee = notional * self.fee_rate;

        match order.side {
            Side::Buy => {
                let total_cost = notional + fee;
                if low > order.price || self.state.balance < total_cost {
                    return None;
                }
                self.state.balance -= total_cost;
                self.state.inventory += order.size;
            }
            Side::Sell => {
                if high < order.price || self.state.inventory < order.size {
                    return None;
                }
                self.state.balance += notional - fee;
                self.state.inventory -= order.size;
            }
        }

        info!(
            symbol = %self.symbol,
            "{} FILLED @ {:.2} size={:.6} (Fee: ${:.2})",
            order.side,
            order.price,
            order.size,
            fee
        );

        Some(Trade {
            side: order.side,
            price: order.price,
            size: order.size,
            fee,
            time,
        })
    }
}
