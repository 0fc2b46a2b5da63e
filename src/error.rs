//! Engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::types::CandleValidationError;

/// Failure kinds surfaced by the engine, the data collaborators and the state store.
///
/// Fills that cannot execute for lack of funds or inventory are not errors; the
/// order simply stays pending. Risk rejections are not errors either.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no data available for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("invalid candle at index {index}: {source}")]
    InvalidCandle {
        index: usize,
        #[source]
        source: CandleValidationError,
    },

    #[error("indicator series has {indicators} entries for {candles} candles")]
    IndicatorMismatch { candles: usize, indicators: usize },

    #[error("malformed row {row} in {path}: {reason}")]
    MalformedRow {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to persist state to {path} after {attempts} attempts: {source}")]
    Persistence {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("persisted state at {path} is unreadable: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
