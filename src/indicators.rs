//! Technical indicators
//!
//! Simple rolling ATR and SMA trend filter. Every series is aligned with its
//! input and holds `None` until the window is filled.

use serde::{Deserialize, Serialize};

use crate::Candle;

/// Indicator values attached to one candle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub atr: Option<f64>,
    pub sma_trend: Option<f64>,
}

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    if period == 0 {
        result.resize(values.len(), None);
        return result;
    }

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate True Range
///
/// The first candle has no previous close, so its range is `high - low`.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range as a simple rolling mean of true range
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    sma(&tr, period)
}

/// Attach ATR and SMA-trend to every candle of an ordered series
pub fn annotate(candles: &[Candle], atr_period: usize, trend_period: usize) -> Vec<IndicatorSnapshot> {
    let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let atr_values = atr(&high, &low, &close, atr_period);
    let sma_values = sma(&close, trend_period);

    atr_values
        .into_iter()
        .zip(sma_values)
        .map(|(atr, sma_trend)| IndicatorSnapshot { atr, sma_trend })
        .collect()
}

/// Indicators for the last candle of a window only (live polling path)
pub fn latest_snapshot(candles: &[Candle], atr_period: usize, trend_period: usize) -> IndicatorSnapshot {
    let n = candles.len();
    if n == 0 {
        return IndicatorSnapshot::default();
    }

    let atr = if atr_period > 0 && n >= atr_period {
        let start = n - atr_period;
        let sum: f64 = (start..n)
            .map(|i| {
                let c = &candles[i];
                match i.checked_sub(1).map(|p| candles[p].close) {
                    Some(prev_close) => (c.high - c.low)
                        .max((c.high - prev_close).abs())
                        .max((c.low - prev_close).abs()),
                    None => c.high - c.low,
                }
            })
            .sum();
        Some(sum / atr_period as f64)
    } else {
        None
    };

    let sma_trend = if trend_period > 0 && n >= trend_period {
        let sum: f64 = candles[n - trend_period..].iter().map(|c| c.close).sum();
        Some(sum / trend_period as f64)
    } else {
        None
    };

    IndicatorSnapshot { atr, sma_trend }
}
