// src/core/report.rs
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::core::aggregator::{Bucket, InstrumentTotals, RunningTotals};
use crate::core::fifo::{MatchOutcome, Roundtrip};
use crate::error::Warning;
use crate::types::{InstrumentSpec, WindowKind};
use crate::utils::precision::round_half_up;
use crate::utils::tz::fixed;

/// Decimal places applied when values leave the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rounding {
    /// Generic cash fields.
    pub cash_places: u32,
    /// Final P&L figures.
    pub report_places: u32,
}

impl Default for Rounding {
    fn default() -> Self {
        Self {
            cash_places: 4,
            report_places: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashBreakdown {
    pub turnover: Decimal,
    pub trade_buy_cash: Decimal,
    pub trade_sell_cash: Decimal,
    pub commissions: Decimal,
    pub taxes: Decimal,
    pub dividends: Decimal,
    pub coupons: Decimal,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub other: Decimal,
    pub net_cashflow_excl_deposits: Decimal,
    pub net_cashflow_incl_deposits: Decimal,
}

impl CashBreakdown {
    pub fn from_totals(t: &RunningTotals, places: u32) -> Self {
        let r = |v: Decimal| round_half_up(v, places);
        Self {
            turnover: r(t.turnover),
            trade_buy_cash: r(t.trade_buy_cash),
            trade_sell_cash: r(t.trade_sell_cash),
            commissions: r(t.commissions),
            taxes: r(t.taxes),
            dividends: r(t.dividends),
            coupons: r(t.coupons),
            deposits: r(t.deposits),
            withdrawals: r(t.withdrawals),
            other: r(t.other),
            net_cashflow_excl_deposits: r(t.net_excl_deposits()),
            net_cashflow_incl_deposits: r(t.net_incl_deposits()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowRecord {
    pub kind: WindowKind,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub currency: String,
    pub operations: usize,
    pub stats: CashBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentRecord {
    pub instrument_id: String,
    pub currency: String,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub stats: CashBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundtripRecord {
    pub open_time: DateTime<FixedOffset>,
    pub close_time: DateTime<FixedOffset>,
    pub qty: u64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub pnl_gross: Decimal,
    pub is_win: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentRoundtrips {
    pub instrument_id: String,
    pub figi: String,
    pub ticker: String,
    pub class_code: String,
    pub currency: String,
    pub n_trades: usize,
    pub n_roundtrips: usize,
    pub wins: usize,
    pub losses: usize,
    pub pnl_gross: Decimal,
    pub commissions: Decimal,
    pub pnl_net: Decimal,
    pub open_qty: u64,
    pub roundtrips: Vec<RoundtripRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub timezone: String,
    pub account_id: String,
    pub generated_at: DateTime<FixedOffset>,
    pub since: DateTime<FixedOffset>,
    pub until: DateTime<FixedOffset>,
    pub source: String,
    /// True when the operation or trade source stopped early.
    pub partial: bool,
    pub operations_seen: usize,
    pub operations_skipped: usize,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub windows: Vec<WindowRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruments: Option<Vec<InstrumentRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roundtrips: Option<Vec<InstrumentRoundtrips>>,
}

/// Turns full-precision engine state into the rounded, ordered report shape.
#[derive(Debug, Clone, Copy)]
pub struct ReportAssembler {
    pub tz: Tz,
    pub rounding: Rounding,
}

impl ReportAssembler {
    pub fn new(tz: Tz, rounding: Rounding) -> Self {
        Self { tz, rounding }
    }

    fn local(&self, instant: &DateTime<Utc>) -> DateTime<FixedOffset> {
        fixed(&instant.with_timezone(&self.tz))
    }

    pub fn window_records<'a>(&self, buckets: impl Iterator<Item = &'a Bucket>) -> Vec<WindowRecord> {
        let mut records: Vec<WindowRecord> = buckets
            .map(|b| WindowRecord {
                kind: b.window.kind,
                start: fixed(&b.window.start),
                end: fixed(&b.window.end),
                currency: b.currency.clone(),
                operations: b.operations,
                stats: CashBreakdown::from_totals(&b.totals, self.rounding.cash_places),
            })
            .collect();
        records.sort_by(|a, b| {
            (a.kind, a.start, &a.currency).cmp(&(b.kind, b.start, &b.currency))
        });
        records
    }

    pub fn instrument_records<'a>(
        &self,
        totals: impl Iterator<Item = &'a InstrumentTotals>,
    ) -> Vec<InstrumentRecord> {
        totals
            .map(|t| InstrumentRecord {
                instrument_id: t.instrument_id.clone(),
                currency: t.currency.clone(),
                total_trades: t.total_trades,
                buy_trades: t.buy_trades,
                sell_trades: t.sell_trades,
                stats: CashBreakdown::from_totals(&t.totals, self.rounding.cash_places),
            })
            .collect()
    }

    /// Summary and roundtrips of one instrument; P&L figures are summed at full
    /// precision and rounded once.
    pub fn roundtrip_block(
        &self,
        spec: &InstrumentSpec,
        outcome: &MatchOutcome,
        commissions: Decimal,
    ) -> InstrumentRoundtrips {
        let places = self.rounding.report_places;
        let pnl_gross = outcome.pnl_gross;

        let mut trips: Vec<&Roundtrip> = outcome.roundtrips.iter().collect();
        trips.sort_by_key(|r| r.close_time);

        InstrumentRoundtrips {
            instrument_id: spec.instrument_id.clone(),
            figi: spec.figi.clone(),
            ticker: spec.ticker.clone(),
            class_code: spec.class_code.clone(),
            currency: spec.currency.clone(),
            n_trades: outcome.n_trades,
            n_roundtrips: outcome.roundtrips.len(),
            wins: outcome.wins(),
            losses: outcome.losses(),
            pnl_gross: round_half_up(pnl_gross, places),
            commissions: round_half_up(commissions, places),
            pnl_net: round_half_up(pnl_gross - commissions, places),
            open_qty: outcome.open_qty(),
            roundtrips: trips
                .into_iter()
                .map(|r| RoundtripRecord {
                    open_time: self.local(&r.open_time),
                    close_time: self.local(&r.close_time),
                    qty: r.qty,
                    buy_price: r.buy_price,
                    sell_price: r.sell_price,
                    pnl_gross: round_half_up(r.pnl_gross, places),
                    is_win: r.is_win,
                })
                .collect(),
        }
    }

    pub fn meta(&self, parts: MetaParts) -> ReportMeta {
        ReportMeta {
            timezone: self.tz.name().to_string(),
            account_id: parts.account_id,
            generated_at: self.local(&parts.generated_at),
            since: self.local(&parts.since),
            until: self.local(&parts.until),
            source: parts.source,
            partial: parts.partial,
            operations_seen: parts.operations_seen,
            operations_skipped: parts.operations_skipped,
            warnings: parts.warnings,
        }
    }
}

/// Raw inputs for `ReportMeta`.
#[derive(Debug, Clone)]
pub struct MetaParts {
    pub account_id: String,
    pub generated_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub source: String,
    pub partial: bool,
    pub operations_seen: usize,
    pub operations_skipped: usize,
    pub warnings: Vec<Warning>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fifo::match_trades;
    use crate::types::{Side, Trade};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn cash_fields_round_half_up_and_keep_net_identity() {
        let totals = RunningTotals {
            turnover: dec!(1.00005),
            trade_sell_cash: dec!(1.00005),
            deposits: dec!(10.123449),
            withdrawals: dec!(0.00005),
            ..RunningTotals::default()
        };
        let row = CashBreakdown::from_totals(&totals, 4);
        assert_eq!(row.turnover, dec!(1.0001));
        assert_eq!(row.deposits, dec!(10.1234));
        assert_eq!(row.withdrawals, dec!(0.0001));
        assert_eq!(
            totals.net_incl_deposits() - totals.net_excl_deposits(),
            totals.deposits - totals.withdrawals
        );
    }

    #[test]
    fn roundtrip_block_sums_before_rounding() {
        let spec = InstrumentSpec {
            instrument_id: "uid".to_string(),
            figi: "FIGI".to_string(),
            ticker: "T".to_string(),
            class_code: "TQBR".to_string(),
            lot: 1,
            currency: "rub".to_string(),
            futures: None,
        };
        let at = |m| Utc.with_ymd_and_hms(2024, 5, 2, 10, m, 0).unwrap();
        let trade = |side, price, m| Trade {
            id: format!("{m}"),
            instrument_id: "uid".to_string(),
            side,
            quantity: 1,
            price,
            date: at(m),
        };
        // Each trip earns 0.005, which would round to 0.01 on its own.
        let trades = vec![
            trade(Side::Buy, dec!(1.000), 0),
            trade(Side::Buy, dec!(1.000), 1),
            trade(Side::Sell, dec!(1.005), 2),
            trade(Side::Sell, dec!(1.005), 3),
        ];
        let outcome = match_trades(&trades, &spec).unwrap();
        let assembler = ReportAssembler::new(chrono_tz::Europe::Moscow, Rounding::default());
        let block = assembler.roundtrip_block(&spec, &outcome, dec!(0.004));

        assert_eq!(block.pnl_gross, dec!(0.01));
        assert_eq!(block.commissions, dec!(0.00));
        assert_eq!(block.pnl_net, dec!(0.01));
        assert_eq!(block.roundtrips[0].pnl_gross, dec!(0.01));
        assert_eq!((block.wins, block.losses), (2, 0));
        assert_eq!(block.roundtrips[0].close_time.offset().local_minus_utc(), 3 * 3600);
    }
}
