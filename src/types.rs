// src/types.rs
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StatsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Exact monetary amount tagged with its currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

/// One executed account operation as delivered by the operation source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub date: DateTime<Utc>,
    /// `None` when the broker attached no cash movement to the operation.
    pub payment: Option<Money>,
    pub type_label: String,
    pub instrument_id: Option<String>,
}

/// One executed fill used for FIFO matching. `quantity` is in lots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub instrument_id: String,
    pub side: Side,
    pub quantity: u64,
    pub price: Decimal,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuturesSpec {
    pub min_price_increment: Decimal,
    /// Currency value of one `min_price_increment`.
    pub min_price_increment_amount: Decimal,
}

impl FuturesSpec {
    /// Currency per one price point. `None` when the increment is zero.
    pub fn point_value(&self) -> Option<Decimal> {
        if self.min_price_increment.is_zero() {
            return None;
        }
        Some(self.min_price_increment_amount / self.min_price_increment)
    }
}

/// Instrument metadata returned by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub instrument_id: String,
    pub figi: String,
    pub ticker: String,
    pub class_code: String,
    pub lot: u64,
    pub currency: String,
    pub futures: Option<FuturesSpec>,
}

impl InstrumentSpec {
    pub fn is_derivative(&self) -> bool {
        self.futures.is_some()
    }

    pub fn point_value(&self) -> Option<Decimal> {
        self.futures.as_ref().and_then(FuturesSpec::point_value)
    }
}

/// Window granularity. Declaration order is the output sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Day,
    Week,
    Month,
    Year,
}

impl WindowKind {
    pub const ALL: [WindowKind; 4] = [
        WindowKind::Day,
        WindowKind::Week,
        WindowKind::Month,
        WindowKind::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Day => "day",
            WindowKind::Week => "week",
            WindowKind::Month => "month",
            WindowKind::Year => "year",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowKind {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(WindowKind::Day),
            "week" => Ok(WindowKind::Week),
            "month" => Ok(WindowKind::Month),
            "year" => Ok(WindowKind::Year),
            other => Err(StatsError::UnknownWindowKind(other.to_string())),
        }
    }
}

/// Half-open local interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub kind: WindowKind,
}

impl Window {
    pub fn contains(&self, instant: &DateTime<Tz>) -> bool {
        self.start <= *instant && *instant < self.end
    }
}
