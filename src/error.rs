// src/error.rs
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Unknown window kind: {0}")]
    UnknownWindowKind(String),

    #[error("Operation source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Currency mismatch in bucket: expected {expected}, got {got}")]
    CurrencyMismatch { expected: String, got: String },

    #[error("Arithmetic overflow matching {instrument_id} at trade {trade_id}")]
    Overflow { instrument_id: String, trade_id: String },
}

pub type Result<T> = std::result::Result<T, StatsError>;

/// Non-fatal degradation attached to the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    EmptyRange,
    UnresolvableInstrument { instrument_id: String, reason: String },
    TruncatedOperations { pages_fetched: usize, reason: String },
    TradesUnavailable { reason: String },
    MalformedRecord { id: String, reason: String },
    /// Matching for the instrument was abandoned; its cash totals still count.
    MatchFailed { instrument_id: String, reason: String },
}
