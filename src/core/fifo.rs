// src/core/fifo.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

use crate::error::{Result, StatsError};
use crate::types::{InstrumentSpec, Side, Trade};

/// Open buy fragment waiting in the FIFO queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    pub price: Decimal,
    pub remaining_qty: u64,
    pub opened_at: DateTime<Utc>,
}

/// A closed (buy, sell) pair with realized gross P&L.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Roundtrip {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub qty: u64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub pnl_gross: Decimal,
    pub is_win: bool,
}

/// FIFO matching state for a single instrument.
#[derive(Debug, Clone)]
pub struct FifoMatcher {
    instrument_id: String,
    lot: u64,
    point_value: Option<Decimal>,
    queue: VecDeque<InventoryEntry>,
}

impl FifoMatcher {
    pub fn new(spec: &InstrumentSpec) -> Self {
        let point_value = spec.point_value();
        if spec.is_derivative() && point_value.is_none() {
            warn!(
                "Derivative {} has no point value, P&L stays in price points",
                spec.instrument_id
            );
        }
        Self {
            instrument_id: spec.instrument_id.clone(),
            lot: spec.lot.max(1),
            point_value,
            queue: VecDeque::new(),
        }
    }

    /// Feeds one trade. Buys open inventory; sells consume it from the front.
    /// Selling more than is open stops once the queue is empty.
    ///
    /// Fails when the lot-scaled quantity or a roundtrip's P&L does not fit.
    pub fn on_trade(&mut self, trade: &Trade) -> Result<Vec<Roundtrip>> {
        let qty = trade
            .quantity
            .checked_mul(self.lot)
            .ok_or_else(|| self.overflow(trade))?;
        if qty == 0 {
            return Ok(Vec::new());
        }

        match trade.side {
            Side::Buy => {
                self.queue.push_back(InventoryEntry {
                    price: trade.price,
                    remaining_qty: qty,
                    opened_at: trade.date,
                });
                Ok(Vec::new())
            }
            Side::Sell => self.close(qty, trade),
        }
    }

    fn close(&mut self, mut qty: u64, trade: &Trade) -> Result<Vec<Roundtrip>> {
        let point_value = self.point_value;
        let mut trips = Vec::new();
        while qty > 0 {
            let Some(front) = self.queue.front() else {
                break;
            };
            let taken = qty.min(front.remaining_qty);
            let pnl_gross = gross_pnl(front.price, trade.price, taken, point_value)
                .ok_or_else(|| self.overflow(trade))?;
            trips.push(Roundtrip {
                open_time: front.opened_at,
                close_time: trade.date,
                qty: taken,
                buy_price: front.price,
                sell_price: trade.price,
                pnl_gross,
                is_win: pnl_gross >= Decimal::ZERO,
            });

            qty -= taken;
            if let Some(front) = self.queue.front_mut() {
                front.remaining_qty -= taken;
                if front.remaining_qty == 0 {
                    self.queue.pop_front();
                }
            }
        }
        Ok(trips)
    }

    fn overflow(&self, trade: &Trade) -> StatsError {
        StatsError::Overflow {
            instrument_id: self.instrument_id.clone(),
            trade_id: trade.id.clone(),
        }
    }

    pub fn open_inventory(&self) -> impl Iterator<Item = &InventoryEntry> {
        self.queue.iter()
    }

    pub fn open_qty(&self) -> u64 {
        self.queue.iter().map(|e| e.remaining_qty).sum()
    }
}

/// `(sell - buy) * qty`, converted to currency by `point_value` for derivatives.
/// `None` on overflow.
fn gross_pnl(buy_price: Decimal, sell_price: Decimal, qty: u64, point_value: Option<Decimal>) -> Option<Decimal> {
    let delta = sell_price.checked_sub(buy_price)?;
    let per_unit = match point_value {
        Some(point_value) => delta.checked_mul(point_value)?,
        None => delta,
    };
    per_unit.checked_mul(Decimal::from(qty))
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub roundtrips: Vec<Roundtrip>,
    pub open_inventory: Vec<InventoryEntry>,
    pub n_trades: usize,
    /// Sum of roundtrip P&L at full precision.
    pub pnl_gross: Decimal,
}

impl MatchOutcome {
    pub fn wins(&self) -> usize {
        self.roundtrips.iter().filter(|r| r.is_win).count()
    }

    pub fn losses(&self) -> usize {
        self.roundtrips.len() - self.wins()
    }

    pub fn open_qty(&self) -> u64 {
        self.open_inventory.iter().map(|e| e.remaining_qty).sum()
    }
}

/// Runs FIFO matching over one instrument's trades in time order.
/// Trades with equal timestamps keep their delivered order.
pub fn match_trades(trades: &[Trade], spec: &InstrumentSpec) -> Result<MatchOutcome> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.date);

    let mut matcher = FifoMatcher::new(spec);
    let mut roundtrips = Vec::new();
    let mut pnl_gross = Decimal::ZERO;
    for trade in &ordered {
        for trip in matcher.on_trade(trade)? {
            pnl_gross = pnl_gross
                .checked_add(trip.pnl_gross)
                .ok_or_else(|| matcher.overflow(trade))?;
            roundtrips.push(trip);
        }
    }

    Ok(MatchOutcome {
        roundtrips,
        open_inventory: matcher.open_inventory().cloned().collect(),
        n_trades: ordered.len(),
        pnl_gross,
    })
}
