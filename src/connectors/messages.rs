// src/connectors/messages.rs
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{FuturesSpec, InstrumentSpec, Money, Operation, Side, Trade};
use crate::utils::precision::{decimal_from_units_nano, safe_currency};
use crate::utils::tz::parse_instant;

pub const STATE_EXECUTED: &str = "OPERATION_STATE_EXECUTED";

/// Денежное значение в формате API: units + nano (+ валюта).
#[derive(Debug, Clone, Deserialize)]
pub struct MoneyValue {
    #[serde(default)]
    pub currency: Option<String>,
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl MoneyValue {
    pub fn to_money(&self) -> Money {
        Money::new(
            decimal_from_units_nano(self.units, self.nano),
            safe_currency(self.currency.as_deref()),
        )
    }
}

/// Price or ratio without currency.
#[derive(Debug, Clone, Deserialize)]
pub struct Quotation {
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl Quotation {
    pub fn to_decimal(&self) -> Decimal {
        decimal_from_units_nano(self.units, self.nano)
    }
}

/// Operation item as returned by the cursor endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationItem {
    pub id: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "type", default)]
    pub operation_type: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub payment: Option<MoneyValue>,
    #[serde(default)]
    pub instrument_uid: Option<String>,
    #[serde(default)]
    pub figi: Option<String>,
    #[serde(default)]
    pub position_uid: Option<String>,
}

impl OperationItem {
    /// UID, then FIGI, then position UID; empty strings do not count.
    pub fn instrument_id(&self) -> Option<String> {
        [&self.instrument_uid, &self.figi, &self.position_uid]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .cloned()
    }

    pub fn into_operation(self) -> Result<Operation, String> {
        let raw_date = self.date.as_deref().ok_or("missing date")?;
        let date = parse_instant(raw_date).ok_or_else(|| format!("bad date {raw_date:?}"))?;
        let instrument_id = self.instrument_id();
        Ok(Operation {
            id: self.id,
            date,
            payment: self.payment.as_ref().map(MoneyValue::to_money),
            type_label: self.operation_type,
            instrument_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeItem {
    pub id: String,
    #[serde(default)]
    pub figi: Option<String>,
    #[serde(default)]
    pub instrument_uid: Option<String>,
    /// "TRADE_DIRECTION_BUY" / "TRADE_DIRECTION_SELL"
    pub direction: String,
    pub quantity: u64,
    pub price: Quotation,
    pub date_time: String,
}

impl TradeItem {
    pub fn into_trade(self) -> Result<Trade, String> {
        let side = match self.direction.to_uppercase().as_str() {
            d if d.ends_with("BUY") => Side::Buy,
            d if d.ends_with("SELL") => Side::Sell,
            other => return Err(format!("unknown direction {other:?}")),
        };
        let date = parse_instant(&self.date_time)
            .ok_or_else(|| format!("bad date {:?}", self.date_time))?;
        let instrument_id = [&self.instrument_uid, &self.figi]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .cloned()
            .ok_or("missing instrument id")?;
        Ok(Trade {
            id: self.id,
            instrument_id,
            side,
            quantity: self.quantity,
            price: self.price.to_decimal(),
            date,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentItem {
    pub uid: String,
    pub figi: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub class_code: String,
    #[serde(default)]
    pub lot: u64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub min_price_increment: Option<Quotation>,
    #[serde(default)]
    pub min_price_increment_amount: Option<Quotation>,
}

impl InstrumentItem {
    pub fn is_future(&self) -> bool {
        self.instrument_type.eq_ignore_ascii_case("futures")
    }

    pub fn to_spec(&self) -> InstrumentSpec {
        let futures = if self.is_future() {
            let zero = || Decimal::ZERO;
            Some(FuturesSpec {
                min_price_increment: self
                    .min_price_increment
                    .as_ref()
                    .map_or_else(zero, Quotation::to_decimal),
                min_price_increment_amount: self
                    .min_price_increment_amount
                    .as_ref()
                    .map_or_else(zero, Quotation::to_decimal),
            })
        } else {
            None
        };
        InstrumentSpec {
            instrument_id: self.uid.clone(),
            figi: self.figi.clone(),
            ticker: self.ticker.clone(),
            class_code: self.class_code.clone(),
            lot: self.lot.max(1),
            currency: safe_currency(self.currency.as_deref()),
            futures,
        }
    }
}
