//! Core data types used across the grid engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("timestamp {current} does not follow previous candle at {previous}")]
    NonIncreasingTimestamp {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }
}

/// Trading pair symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned into every session, log span and persisted map key, so
/// cloning is kept O(1).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order / fill direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Trend classification relative to the SMA filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

/// Resting limit order owned by the ledger until filled or replaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

/// Immutable fill record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub time: DateTime<Utc>,
}

impl Trade {
    /// Gross notional of the fill (price × size), fee excluded
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// One mark-to-market observation, appended once per cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub datetime: DateTime<Utc>,
    pub equity: f64,
}

/// What the signal asks the ledger to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    /// Cancel every resting order and place the carried ladder
    UpdateGrid,
}

/// Declarative grid replacement emitted by the strategy engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSignal {
    pub action: SignalAction,
    pub buy_levels: Vec<f64>,
    pub sell_levels: Vec<f64>,
    pub suggested_size_per_grid: f64,
    pub trend: Trend,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_candle_validation() {
        assert!(Candle::new(ts(), 100.0, 101.0, 99.0, 100.5, 10.0).is_ok());
        assert!(matches!(
            Candle::new(ts(), 100.0, 99.0, 101.0, 100.0, 10.0),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
        assert!(matches!(
            Candle::new(ts(), 100.0, 101.0, 99.0, 102.0, 10.0),
            Err(CandleValidationError::CloseOutOfRange { .. })
        ));
        assert!(matches!(
            Candle::new(ts(), 0.0, 101.0, 99.0, 100.0, 10.0),
            Err(CandleValidationError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn test_signal_wire_format() {
        let signal = GridSignal {
            action: SignalAction::UpdateGrid,
            buy_levels: vec![99.0],
            sell_levels: vec![101.0],
            suggested_size_per_grid: 2.5,
            trend: Trend::Neutral,
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["action"], "update_grid");
        assert_eq!(json["trend"], "neutral");
    }

    #[test]
    fn test_side_serializes_lowercase() {
        let order = Order {
            side: Side::Buy,
            price: 100.0,
            size: 1.0,
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"side\":\"buy\""));
    }
}
