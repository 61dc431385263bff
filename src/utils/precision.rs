// src/utils/precision.rs
use rust_decimal::{Decimal, RoundingStrategy};

/// Currency assumed when the broker leaves the payment currency empty.
pub const DEFAULT_CURRENCY: &str = "RUB";

/// Fractional digits kept for every amount built from the wire format.
pub const NANO_SCALE: u32 = 9;

/// Собирает Decimal из пары units + nano (как в API брокера).
/// The value is negative when either part is negative.
/// Пример: units=-1, nano=-500_000_000 -> -1.5
pub fn decimal_from_units_nano(units: i64, nano: i32) -> Decimal {
    let magnitude = Decimal::from(units.unsigned_abs())
        + Decimal::new(i64::from(nano).abs(), NANO_SCALE);
    let value = if units < 0 || nano < 0 {
        -magnitude
    } else {
        magnitude
    };
    value.round_dp(NANO_SCALE)
}

/// Округляет по правилу half-up (от нуля) до `places` знаков.
/// Used only when a value leaves the engine; accumulation stays exact.
pub fn round_half_up(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

pub fn safe_currency(currency: Option<&str>) -> String {
    match currency.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => DEFAULT_CURRENCY.to_string(),
    }
}
