// src/core/engine.rs
use crate::connectors::cache::InstrumentCache;
use crate::connectors::traits::{
    operation_pages, InstrumentResolver, OperationSource, OperationsRequest, TradeSource,
};
use crate::core::aggregator::TotalsAggregator;
use crate::core::fifo::match_trades;
use crate::core::report::{InstrumentRoundtrips, MetaParts, Report, ReportAssembler, Rounding};
use crate::core::windows::{partition, WindowGrid};
use crate::error::{Result, StatsError, Warning};
use crate::types::{Trade, WindowKind};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::{pin_mut, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Typed run parameters, validated from configuration.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub account_id: String,
    pub tz: Tz,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub kinds: BTreeSet<WindowKind>,
    pub include_roundtrips: bool,
    pub include_instruments: bool,
    pub rounding: Rounding,
    pub page_size: u32,
}

pub struct StatsEngine {
    params: EngineParams,
    operation_source: Box<dyn OperationSource>,
    trade_source: Box<dyn TradeSource>,
    instruments: InstrumentCache,
}

impl StatsEngine {
    pub fn new(
        params: EngineParams,
        operation_source: Box<dyn OperationSource>,
        trade_source: Box<dyn TradeSource>,
        resolver: Box<dyn InstrumentResolver>,
    ) -> Self {
        Self {
            params,
            operation_source,
            trade_source,
            instruments: InstrumentCache::new(resolver),
        }
    }

    /// Builds the full report. Per-instrument and per-record problems become
    /// warnings; only a source that yields nothing at all is an error.
    pub async fn run(&mut self) -> Result<Report> {
        let p = self.params.clone();
        info!(
            "Engine starting: account {} [{} .. {}) in {}",
            p.account_id,
            p.since,
            p.until,
            p.tz.name()
        );

        let mut warnings = Vec::new();
        let windows = partition(p.since, p.until, p.tz, &p.kinds);
        let grid = WindowGrid::new(windows);
        info!("Window grid ready: {} windows", grid.len());

        let mut aggregator = TotalsAggregator::new(grid, p.tz, p.since, p.until);
        let mut partial = false;
        let mut roundtrips = None;

        if p.since >= p.until {
            warn!("Empty range, nothing to fetch");
            warnings.push(Warning::EmptyRange);
        } else {
            partial |= self.fold_operations(&mut aggregator, &mut warnings).await?;
            if p.include_roundtrips {
                let (blocks, truncated) = self.match_roundtrips(&aggregator, &mut warnings).await;
                partial |= truncated;
                roundtrips = Some(blocks);
            }
        }

        let assembler = ReportAssembler::new(p.tz, p.rounding);
        let windows = assembler.window_records(aggregator.buckets());
        let instruments = p
            .include_instruments
            .then(|| assembler.instrument_records(aggregator.instrument_totals()));

        if !warnings.is_empty() {
            warn!("Report has {} warnings", warnings.len());
        }

        let meta = assembler.meta(MetaParts {
            account_id: p.account_id.clone(),
            generated_at: Utc::now(),
            since: p.since,
            until: p.until,
            source: self.operation_source.describe(),
            partial,
            operations_seen: aggregator.operations_seen(),
            operations_skipped: aggregator.operations_skipped(),
            warnings,
        });

        info!(
            "Report assembled: {} window records, partial: {}",
            windows.len(),
            partial
        );
        Ok(Report {
            meta,
            windows,
            instruments,
            roundtrips,
        })
    }

    /// Pulls every page and folds it. Returns `true` if the source stopped early.
    async fn fold_operations(
        &self,
        aggregator: &mut TotalsAggregator,
        warnings: &mut Vec<Warning>,
    ) -> Result<bool> {
        let request = OperationsRequest {
            account_id: self.params.account_id.clone(),
            from: self.params.since,
            to: self.params.until,
            cursor: String::new(),
            limit: self.params.page_size,
        };
        let pages = operation_pages(self.operation_source.as_ref(), request);
        pin_mut!(pages);

        let mut pages_fetched = 0usize;
        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(e) if pages_fetched == 0 => {
                    error!("Operation source failed on first page: {:#}", e);
                    return Err(StatsError::SourceUnavailable(format!("{:#}", e)));
                }
                Err(e) => {
                    warn!("Operation source stopped after {} pages: {:#}", pages_fetched, e);
                    warnings.push(Warning::TruncatedOperations {
                        pages_fetched,
                        reason: format!("{:#}", e),
                    });
                    return Ok(true);
                }
            };

            pages_fetched += 1;
            debug!(
                "Page {}: {} operations, {} rejected",
                pages_fetched,
                page.items.len(),
                page.rejected.len()
            );
            for rejected in page.rejected {
                warnings.push(Warning::MalformedRecord {
                    id: rejected.id,
                    reason: rejected.reason,
                });
            }
            for op in &page.items {
                aggregator.fold(op)?;
            }
        }

        info!(
            "Folded {} operations from {} pages",
            aggregator.operations_seen(),
            pages_fetched
        );
        Ok(false)
    }

    /// FIFO-matches every instrument independently. Returns `true` when trades
    /// could not be fetched at all.
    async fn match_roundtrips(
        &mut self,
        aggregator: &TotalsAggregator,
        warnings: &mut Vec<Warning>,
    ) -> (Vec<InstrumentRoundtrips>, bool) {
        let batch = match self
            .trade_source
            .fetch_trades(&self.params.account_id, self.params.since, self.params.until)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Trades unavailable: {:#}", e);
                warnings.push(Warning::TradesUnavailable {
                    reason: format!("{:#}", e),
                });
                return (Vec::new(), true);
            }
        };
        for rejected in batch.rejected {
            warn!("Malformed trade {}: {}", rejected.id, rejected.reason);
            warnings.push(Warning::MalformedRecord {
                id: rejected.id,
                reason: rejected.reason,
            });
        }

        let mut by_instrument: BTreeMap<String, Vec<Trade>> = BTreeMap::new();
        for trade in batch.trades {
            by_instrument
                .entry(trade.instrument_id.clone())
                .or_default()
                .push(trade);
        }

        let assembler = ReportAssembler::new(self.params.tz, self.params.rounding);
        let mut blocks = Vec::with_capacity(by_instrument.len());
        for (instrument_id, list) in by_instrument {
            let spec = match self.instruments.resolve(&instrument_id).await {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("Skipping {}: {:#}", instrument_id, e);
                    warnings.push(Warning::UnresolvableInstrument {
                        instrument_id,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let outcome = match match_trades(&list, &spec) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Matching failed for {}: {}", instrument_id, e);
                    warnings.push(Warning::MatchFailed {
                        instrument_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let commissions = aggregator.commissions_for(
                &[
                    instrument_id.as_str(),
                    spec.instrument_id.as_str(),
                    spec.figi.as_str(),
                ],
                &spec.currency,
            );
            info!(
                "{} ({}): {} trades -> {} roundtrips, gross {}",
                spec.ticker,
                instrument_id,
                outcome.n_trades,
                outcome.roundtrips.len(),
                outcome.pnl_gross
            );
            blocks.push(assembler.roundtrip_block(&spec, &outcome, commissions));
        }
        blocks.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));

        debug!("Instrument lookups: {}", self.instruments.lookups());
        (blocks, false)
    }
}
