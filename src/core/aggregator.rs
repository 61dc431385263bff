// src/core/aggregator.rs
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::core::classify::{classify, Category};
use crate::core::windows::WindowGrid;
use crate::error::{Result, StatsError};
use crate::types::{Money, Operation, Window, WindowKind};

/// Instrument key for operations that reference no instrument.
pub const UNSPECIFIED_INSTRUMENT: &str = "UNSPECIFIED";

/// Cash totals of one bucket. Every field only ever grows, except `other`,
/// which takes the signed amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunningTotals {
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
}

impl RunningTotals {
    pub fn apply(&mut self, category: Category, amount: Decimal) {
        let magnitude = amount.abs();
        match category {
            Category::Trade => {
                if amount.is_sign_negative() && !amount.is_zero() {
                    self.trade_buy_cash += magnitude;
                } else {
                    self.trade_sell_cash += amount;
                }
                self.turnover += magnitude;
            }
            Category::Fee => self.commissions += magnitude,
            Category::Tax => self.taxes += magnitude,
            Category::Dividend => self.dividends += magnitude,
            Category::Coupon => self.coupons += magnitude,
            Category::Deposit => self.deposits += magnitude,
            Category::Withdrawal => self.withdrawals += magnitude,
            // Signed on purpose: refunds and corrections net against each other.
            Category::Other => self.other += amount,
        }
    }

    pub fn net_excl_deposits(&self) -> Decimal {
        (self.trade_sell_cash + self.dividends + self.coupons)
            - (self.trade_buy_cash + self.commissions + self.taxes)
    }

    pub fn net_incl_deposits(&self) -> Decimal {
        self.net_excl_deposits() + self.deposits - self.withdrawals
    }
}

/// Bucket ordering is the report ordering: kind, window start, currency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BucketKey {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub window: Window,
    pub currency: String,
    pub totals: RunningTotals,
    pub operations: usize,
}

impl Bucket {
    fn new(window: Window, currency: String) -> Self {
        Self {
            window,
            currency,
            totals: RunningTotals::default(),
            operations: 0,
        }
    }

    pub fn add(&mut self, category: Category, payment: &Money) -> Result<()> {
        if payment.currency != self.currency {
            return Err(StatsError::CurrencyMismatch {
                expected: self.currency.clone(),
                got: payment.currency.clone(),
            });
        }
        self.totals.apply(category, payment.amount);
        self.operations += 1;
        Ok(())
    }
}

/// Range-wide cash breakdown for one `(instrument, currency)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentTotals {
    pub instrument_id: String,
    pub currency: String,
    pub totals: RunningTotals,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
}

impl InstrumentTotals {
    fn new(instrument_id: String, currency: String) -> Self {
        Self {
            instrument_id,
            currency,
            totals: RunningTotals::default(),
            total_trades: 0,
            buy_trades: 0,
            sell_trades: 0,
        }
    }

    fn add(&mut self, category: Category, amount: Decimal) {
        if category == Category::Trade {
            self.total_trades += 1;
            if amount.is_sign_negative() && !amount.is_zero() {
                self.buy_trades += 1;
            } else {
                self.sell_trades += 1;
            }
        }
        self.totals.apply(category, amount);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Folded into this many window buckets.
    Applied(usize),
    MissingPayment,
    OutOfRange,
}

/// Folds operations into per-window, per-currency running totals.
///
/// An operation lands in the containing window of every requested kind, so a
/// single operation updates its day, week, month and year buckets together.
pub struct TotalsAggregator {
    grid: WindowGrid,
    tz: Tz,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    buckets: BTreeMap<BucketKey, Bucket>,
    // (currency, instrument_id)
    instruments: BTreeMap<(String, String), InstrumentTotals>,
    seen: usize,
    skipped: usize,
}

impl TotalsAggregator {
    pub fn new(grid: WindowGrid, tz: Tz, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            grid,
            tz,
            since,
            until,
            buckets: BTreeMap::new(),
            instruments: BTreeMap::new(),
            seen: 0,
            skipped: 0,
        }
    }

    pub fn fold(&mut self, op: &Operation) -> Result<FoldOutcome> {
        self.seen += 1;

        let Some(payment) = op.payment.as_ref() else {
            self.skipped += 1;
            debug!("Operation {} ({}) has no payment, skipped", op.id, op.type_label);
            return Ok(FoldOutcome::MissingPayment);
        };

        if op.date < self.since || op.date >= self.until {
            debug!("Operation {} at {} is outside the range", op.id, op.date);
            return Ok(FoldOutcome::OutOfRange);
        }

        let category = classify(&op.type_label);
        let local = op.date.with_timezone(&self.tz);

        let mut applied = 0;
        for window in self.grid.containing(&local) {
            let key = BucketKey {
                kind: window.kind,
                start: window.start.with_timezone(&Utc),
                currency: payment.currency.clone(),
            };
            self.buckets
                .entry(key)
                .or_insert_with(|| Bucket::new(window.clone(), payment.currency.clone()))
                .add(category, payment)?;
            applied += 1;
        }

        let instrument_id = op
            .instrument_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| UNSPECIFIED_INSTRUMENT.to_string());
        self.instruments
            .entry((payment.currency.clone(), instrument_id.clone()))
            .or_insert_with(|| InstrumentTotals::new(instrument_id, payment.currency.clone()))
            .add(category, payment.amount);

        Ok(FoldOutcome::Applied(applied))
    }

    /// Non-empty buckets in `(kind, start, currency)` order.
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    /// Per-instrument breakdown in `(currency, instrument_id)` order.
    pub fn instrument_totals(&self) -> impl Iterator<Item = &InstrumentTotals> {
        self.instruments.values()
    }

    /// Commissions booked in `currency` against any of the given identifiers.
    pub fn commissions_for(&self, ids: &[&str], currency: &str) -> Decimal {
        let ids: BTreeSet<&str> = ids.iter().copied().filter(|id| !id.is_empty()).collect();
        ids.into_iter()
            .filter_map(|id| self.instruments.get(&(currency.to_string(), id.to_string())))
            .map(|t| t.totals.commissions)
            .sum()
    }

    pub fn operations_seen(&self) -> usize {
        self.seen
    }

    pub fn operations_skipped(&self) -> usize {
        self.skipped
    }

    pub fn window_count(&self) -> usize {
        self.grid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::windows::partition;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn op(label: &str, amount: Decimal, currency: &str, date: DateTime<Utc>) -> Operation {
        Operation {
            id: format!("{label}-{date}"),
            date,
            payment: Some(Money::new(amount, currency)),
            type_label: label.to_string(),
            instrument_id: Some("FIGI1".to_string()),
        }
    }

    fn aggregator(kinds: &[WindowKind]) -> TotalsAggregator {
        let since = utc(2024, 1, 1, 0);
        let until = utc(2024, 3, 1, 0);
        let kinds = kinds.iter().copied().collect();
        let grid = WindowGrid::new(partition(since, until, Tz::UTC, &kinds));
        TotalsAggregator::new(grid, Tz::UTC, since, until)
    }

    fn only_bucket(agg: &TotalsAggregator) -> &Bucket {
        let all: Vec<&Bucket> = agg.buckets().collect();
        assert_eq!(all.len(), 1);
        all[0]
    }

    #[test]
    fn operation_fans_out_to_every_kind() {
        let mut agg = aggregator(&WindowKind::ALL);
        let outcome = agg
            .fold(&op("OPERATION_TYPE_BUY", dec!(-150.5), "rub", utc(2024, 2, 14, 10)))
            .unwrap();
        assert_eq!(outcome, FoldOutcome::Applied(4));

        let kinds: Vec<WindowKind> = agg.buckets().map(|b| b.window.kind).collect();
        assert_eq!(kinds, WindowKind::ALL.to_vec());
        for bucket in agg.buckets() {
            assert_eq!(bucket.totals.trade_buy_cash, dec!(150.5));
            assert_eq!(bucket.totals.turnover, dec!(150.5));
        }
    }

    #[test]
    fn category_rules_update_the_right_fields() {
        let mut agg = aggregator(&[WindowKind::Month]);
        let at = utc(2024, 1, 10, 12);
        for (label, amount) in [
            ("OPERATION_TYPE_BUY", dec!(-1000)),
            ("OPERATION_TYPE_SELL", dec!(1200)),
            ("OPERATION_TYPE_BROKER_FEE", dec!(-3.5)),
            ("OPERATION_TYPE_TAX", dec!(-13)),
            ("OPERATION_TYPE_DIVIDEND", dec!(40)),
            ("OPERATION_TYPE_COUPON", dec!(25.25)),
            ("OPERATION_TYPE_INPUT", dec!(5000)),
            ("OPERATION_TYPE_OUTPUT", dec!(-700)),
        ] {
            agg.fold(&op(label, amount, "rub", at)).unwrap();
        }

        let totals = &only_bucket(&agg).totals;
        assert_eq!(totals.trade_buy_cash, dec!(1000));
        assert_eq!(totals.trade_sell_cash, dec!(1200));
        assert_eq!(totals.turnover, dec!(2200));
        assert_eq!(totals.commissions, dec!(3.5));
        assert_eq!(totals.taxes, dec!(13));
        assert_eq!(totals.dividends, dec!(40));
        assert_eq!(totals.coupons, dec!(25.25));
        assert_eq!(totals.deposits, dec!(5000));
        assert_eq!(totals.withdrawals, dec!(700));
        assert_eq!(totals.other, Decimal::ZERO);

        // (1200 + 40 + 25.25) - (1000 + 3.5 + 13)
        assert_eq!(totals.net_excl_deposits(), dec!(248.75));
        assert_eq!(totals.net_incl_deposits(), dec!(4548.75));
    }

    #[test]
    fn other_keeps_the_sign() {
        let mut agg = aggregator(&[WindowKind::Month]);
        let at = utc(2024, 1, 10, 12);
        agg.fold(&op("OPERATION_TYPE_OVERNIGHT", dec!(12), "rub", at)).unwrap();
        agg.fold(&op("OPERATION_TYPE_OVERNIGHT", dec!(-20), "rub", at)).unwrap();

        assert_eq!(only_bucket(&agg).totals.other, dec!(-8));
    }

    #[test]
    fn missing_payment_is_skipped() {
        let mut agg = aggregator(&WindowKind::ALL);
        let mut unpaid = op("OPERATION_TYPE_BUY", dec!(0), "rub", utc(2024, 1, 5, 9));
        unpaid.payment = None;

        assert_eq!(agg.fold(&unpaid).unwrap(), FoldOutcome::MissingPayment);
        assert_eq!(agg.buckets().count(), 0);
        assert_eq!(agg.operations_seen(), 1);
        assert_eq!(agg.operations_skipped(), 1);
    }

    #[test]
    fn out_of_range_operation_touches_nothing() {
        let mut agg = aggregator(&WindowKind::ALL);
        let late = op("OPERATION_TYPE_SELL", dec!(10), "rub", utc(2024, 3, 1, 0));
        assert_eq!(agg.fold(&late).unwrap(), FoldOutcome::OutOfRange);
        assert_eq!(agg.buckets().count(), 0);
        assert_eq!(agg.instrument_totals().count(), 0);
    }

    #[test]
    fn empty_windows_produce_no_buckets() {
        let mut agg = aggregator(&[WindowKind::Day]);
        agg.fold(&op("OPERATION_TYPE_SELL", dec!(10), "rub", utc(2024, 1, 3, 9)))
            .unwrap();
        agg.fold(&op("OPERATION_TYPE_SELL", dec!(10), "rub", utc(2024, 1, 7, 9)))
            .unwrap();

        assert_eq!(agg.window_count(), 60);
        assert_eq!(agg.buckets().count(), 2);
    }

    #[test]
    fn currencies_get_separate_buckets() {
        let mut agg = aggregator(&[WindowKind::Year]);
        let at = utc(2024, 2, 1, 8);
        agg.fold(&op("OPERATION_TYPE_DIVIDEND", dec!(5), "usd", at)).unwrap();
        agg.fold(&op("OPERATION_TYPE_DIVIDEND", dec!(300), "rub", at)).unwrap();

        let currencies: Vec<&str> = agg.buckets().map(|b| b.currency.as_str()).collect();
        assert_eq!(currencies, vec!["rub", "usd"]);
    }

    #[test]
    fn bucket_rejects_foreign_currency() {
        let windows = partition(
            utc(2024, 1, 1, 0),
            utc(2024, 1, 2, 0),
            Tz::UTC,
            &[WindowKind::Day].into_iter().collect(),
        );
        let mut bucket = Bucket::new(windows[0].clone(), "rub".to_string());
        let err = bucket
            .add(Category::Fee, &Money::new(dec!(-1), "usd"))
            .unwrap_err();
        assert!(matches!(err, StatsError::CurrencyMismatch { .. }));
        assert_eq!(bucket.totals, RunningTotals::default());
    }

    #[test]
    fn instrument_breakdown_counts_trades_and_commissions() {
        let mut agg = aggregator(&[WindowKind::Month]);
        let at = utc(2024, 1, 10, 12);
        agg.fold(&op("OPERATION_TYPE_BUY", dec!(-100), "rub", at)).unwrap();
        agg.fold(&op("OPERATION_TYPE_SELL", dec!(130), "rub", at)).unwrap();
        agg.fold(&op("OPERATION_TYPE_BROKER_FEE", dec!(-0.7), "rub", at)).unwrap();

        let mut orphan = op("OPERATION_TYPE_INPUT", dec!(1000), "rub", at);
        orphan.instrument_id = None;
        agg.fold(&orphan).unwrap();

        let rows: Vec<&InstrumentTotals> = agg.instrument_totals().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].instrument_id, "FIGI1");
        assert_eq!(rows[0].total_trades, 2);
        assert_eq!(rows[0].buy_trades, 1);
        assert_eq!(rows[0].sell_trades, 1);
        assert_eq!(rows[1].instrument_id, UNSPECIFIED_INSTRUMENT);

        assert_eq!(agg.commissions_for(&["FIGI1", "FIGI1", ""], "rub"), dec!(0.7));
        assert_eq!(agg.commissions_for(&["FIGI1"], "usd"), Decimal::ZERO);
    }
}
