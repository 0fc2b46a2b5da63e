//! Data loading
//!
//! Price history comes from a [`CandleSource`]. The bundled source reads
//! OHLCV CSV files; exchange connectivity plugs in behind the same trait.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::{Candle, CandleValidationError, Symbol};

// =============================================================================
// Candle Source
// =============================================================================

/// Data collaborator polled by the paper trader
///
/// An empty vector means "no data this cycle" and is not an error.
pub trait CandleSource: Send {
    /// Latest `limit` candles for `symbol`, oldest first
    fn fetch_latest(&mut self, symbol: &Symbol, limit: usize) -> EngineResult<Vec<Candle>>;
}

/// CSV-backed source
///
/// In tail mode every fetch re-reads the file and returns its last `limit`
/// rows, so a file appended to by an external recorder behaves like a live
/// feed. In replay mode each fetch reveals one more row of a static file.
pub struct CsvCandleSource {
    files: HashMap<Symbol, PathBuf>,
    replay: Option<HashMap<Symbol, usize>>,
}

impl CsvCandleSource {
    pub fn new(files: HashMap<Symbol, PathBuf>) -> Self {
        Self {
            files,
            replay: None,
        }
    }

    /// Step through each file one row per fetch instead of tailing it
    pub fn with_replay(mut self) -> Self {
        self.replay = Some(HashMap::new());
        self
    }
}

impl CandleSource for CsvCandleSource {
    fn fetch_latest(&mut self, symbol: &Symbol, limit: usize) -> EngineResult<Vec<Candle>> {
        let path = self
            .files
            .get(symbol)
            .ok_or_else(|| EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no data file configured".to_string(),
            })?;

        if !path.exists() {
            return Err(EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("data file not found: {}", path.display()),
            });
        }

        let mut candles = load_csv(path)?;

        if let Some(cursors) = self.replay.as_mut() {
            let cursor = cursors.entry(symbol.clone()).or_insert(limit);
            let end = (*cursor).min(candles.len());
            candles.truncate(end);
            *cursor += 1;
        }

        let start = candles.len().saturating_sub(limit);
        debug!(symbol = %symbol, rows = candles.len() - start, "Fetched candles");
        Ok(candles.split_off(start))
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from CSV file
///
/// Columns: datetime, open, high, low, close, volume (header row required).
/// Datetimes are RFC 3339 or `%Y-%m-%d %H:%M:%S` in UTC.
pub fn load_csv(path: impl AsRef<Path>) -> EngineResult<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let malformed = |reason: String| EngineError::MalformedRow {
            path: path.to_path_buf(),
            row: row_idx + 1,
            reason,
        };

        let dt_str = record
            .get(0)
            .ok_or_else(|| malformed("missing datetime column".to_string()))?;
        let datetime = parse_datetime(dt_str)
            .ok_or_else(|| malformed(format!("unparseable datetime: {}", dt_str)))?;

        let field = |idx: usize, name: &str| -> EngineResult<f64> {
            let raw = record
                .get(idx)
                .ok_or_else(|| malformed(format!("missing {} column", name)))?;
            raw.trim()
                .parse::<f64>()
                .map_err(|e| malformed(format!("invalid {} '{}': {}", name, raw, e)))
        };

        let open = field(1, "open")?;
        let high = field(2, "high")?;
        let low = field(3, "low")?;
        let close = field(4, "close")?;
        let volume = field(5, "volume")?;

        candles.push(Candle {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Ok(candles)
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        // Try parsing without timezone and assume UTC
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
    })
}

/// Load data for multiple symbols, one result per symbol
pub fn load_multi_symbol(
    files: &[(Symbol, PathBuf)],
) -> Vec<(Symbol, EngineResult<Vec<Candle>>)> {
    files
        .iter()
        .map(|(symbol, path)| {
            let result = if path.exists() {
                load_csv(path)
            } else {
                Err(EngineError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: format!("data file not found: {}", path.display()),
                })
            };
            if let Ok(candles) = &result {
                info!("Loaded {} candles for {}", candles.len(), symbol);
            }
            (symbol.clone(), result)
        })
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

/// Check OHLC sanity of every candle and strictly increasing timestamps
pub fn validate_candles(candles: &[Candle]) -> EngineResult<()> {
    for (index, candle) in candles.iter().enumerate() {
        candle
            .validate()
            .map_err(|source| EngineError::InvalidCandle { index, source })?;

        if let Some(previous) = index.checked_sub(1).map(|i| &candles[i]) {
            if candle.datetime <= previous.datetime {
                return Err(EngineError::InvalidCandle {
                    index,
                    source: CandleValidationError::NonIncreasingTimestamp {
                        previous: previous.datetime,
                        current: candle.datetime,
                    },
                });
            }
        }
    }
    Ok(())
}
