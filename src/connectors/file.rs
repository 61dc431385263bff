// src/connectors/file.rs
use crate::connectors::messages::{InstrumentItem, OperationItem, TradeItem, STATE_EXECUTED};
use crate::connectors::traits::{
    InstrumentResolver, OperationSource, OperationsPage, OperationsRequest, RejectedRecord,
    TradeBatch, TradeSource,
};
use crate::types::{InstrumentSpec, Operation, Trade};
use crate::utils::tz::parse_instant;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Wire record that decodes into a dated domain record.
trait WireRecord: DeserializeOwned {
    type Record;
    const DATE_KEY: &'static str;

    /// Whether the raw record is served at all, checked before decoding.
    fn is_live(_raw: &Value) -> bool {
        true
    }

    fn convert(self) -> std::result::Result<Self::Record, String>;

    fn date(record: &Self::Record) -> DateTime<Utc>;
}

impl WireRecord for OperationItem {
    type Record = Operation;
    const DATE_KEY: &'static str = "date";

    fn is_live(raw: &Value) -> bool {
        raw_str(raw, "state").map_or(true, |s| s == STATE_EXECUTED)
    }

    fn convert(self) -> std::result::Result<Operation, String> {
        self.into_operation()
    }

    fn date(record: &Operation) -> DateTime<Utc> {
        record.date
    }
}

impl WireRecord for TradeItem {
    type Record = Trade;
    const DATE_KEY: &'static str = "date_time";

    fn convert(self) -> std::result::Result<Trade, String> {
        self.into_trade()
    }

    fn date(record: &Trade) -> DateTime<Utc> {
        record.date
    }
}

#[derive(Debug, Clone)]
struct Dated<T> {
    date: DateTime<Utc>,
    record: std::result::Result<T, RejectedRecord>,
}

/// Decoded export: dated entries in time order, plus rejects with no usable date.
#[derive(Debug)]
struct Records<T> {
    dated: Vec<Dated<T>>,
    undated: Vec<RejectedRecord>,
}

impl<T> Default for Records<T> {
    fn default() -> Self {
        Self {
            dated: Vec::new(),
            undated: Vec::new(),
        }
    }
}

impl<T> Records<T> {
    /// Decodes one record at a time so a bad record only costs itself.
    fn decode<W>(values: Vec<Value>) -> Self
    where
        W: WireRecord<Record = T>,
    {
        let mut records = Records::default();
        for (idx, raw) in values.into_iter().enumerate() {
            if !W::is_live(&raw) {
                continue;
            }
            let id = raw_str(&raw, "id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{idx}"));
            let raw_date = raw_str(&raw, W::DATE_KEY).and_then(parse_instant);

            let decoded = serde_json::from_value::<W>(raw)
                .map_err(|e| e.to_string())
                .and_then(W::convert);
            match (decoded, raw_date) {
                (Ok(record), _) => records.dated.push(Dated {
                    date: W::date(&record),
                    record: Ok(record),
                }),
                (Err(reason), Some(date)) => records.dated.push(Dated {
                    date,
                    record: Err(RejectedRecord { id, reason }),
                }),
                (Err(reason), None) => records.undated.push(RejectedRecord { id, reason }),
            }
        }
        records.dated.sort_by_key(|d| d.date);
        records
    }

    /// Entries with `from <= date < to`.
    fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> &[Dated<T>] {
        let lo = self.dated.partition_point(|d| d.date < from);
        let hi = self.dated.partition_point(|d| d.date < to).max(lo);
        &self.dated[lo..hi]
    }

    fn rejected_count(&self) -> usize {
        self.undated.len() + self.dated.iter().filter(|d| d.record.is_err()).count()
    }
}

fn raw_str<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

#[derive(Debug, Default)]
struct Dump {
    label: String,
    operations: Records<Operation>,
    trades: Option<Records<Trade>>,
    // keyed by both uid and figi; Err holds the decode failure
    instruments: HashMap<String, std::result::Result<InstrumentItem, String>>,
}

/// Serves operations, trades and instrument metadata from JSON exports of the
/// broker API. Cloning shares the loaded data.
///
/// Records are decoded one by one at load time. A record that cannot be read
/// is kept as a rejection and reported by the page or batch covering its date
/// (or the first page, when even the date is unreadable).
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    inner: Arc<Dump>,
}

impl JsonFileSource {
    pub async fn load(
        operations_file: &Path,
        trades_file: Option<&Path>,
        instruments_file: Option<&Path>,
    ) -> Result<Self> {
        let operations: Vec<Value> = read_json(operations_file).await?;
        let trades = match trades_file {
            Some(path) => Some(read_json::<Vec<Value>>(path).await?),
            None => None,
        };
        let instruments = match instruments_file {
            Some(path) => read_json::<Vec<Value>>(path).await?,
            None => Vec::new(),
        };

        let source = Self::from_parts(
            format!("json file {}", operations_file.display()),
            operations,
            trades,
            instruments,
        );
        let dump = &source.inner;
        info!(
            "Loaded {} operations ({} unreadable), {} trades, {} instrument keys from {}",
            dump.operations.dated.len() + dump.operations.undated.len(),
            dump.operations.rejected_count(),
            dump.trades
                .as_ref()
                .map_or(0, |t| t.dated.len() + t.undated.len()),
            dump.instruments.len(),
            operations_file.display()
        );
        Ok(source)
    }

    pub fn from_parts(
        label: impl Into<String>,
        operations: Vec<Value>,
        trades: Option<Vec<Value>>,
        instruments: Vec<Value>,
    ) -> Self {
        let mut by_id = HashMap::new();
        for raw in instruments {
            let keys: Vec<String> = ["uid", "figi"]
                .into_iter()
                .filter_map(|k| raw_str(&raw, k))
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                warn!("Skipping instrument record without uid or figi");
                continue;
            }
            let item = serde_json::from_value::<InstrumentItem>(raw).map_err(|e| e.to_string());
            if let Err(reason) = &item {
                warn!("Instrument {} is malformed: {}", keys[0], reason);
            }
            for key in keys {
                by_id.insert(key, item.clone());
            }
        }

        Self {
            inner: Arc::new(Dump {
                label: label.into(),
                operations: Records::decode::<OperationItem>(operations),
                trades: trades.map(Records::decode::<TradeItem>),
                instruments: by_id,
            }),
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

#[async_trait]
impl OperationSource for JsonFileSource {
    fn describe(&self) -> String {
        self.inner.label.clone()
    }

    /// The cursor is an offset into the executed operations of `[from, to)`,
    /// served in date order.
    async fn fetch_page(&self, request: &OperationsRequest) -> Result<OperationsPage> {
        let offset = if request.cursor.is_empty() {
            0
        } else {
            request
                .cursor
                .parse::<usize>()
                .with_context(|| format!("Invalid cursor {:?}", request.cursor))?
        };
        if request.limit == 0 {
            bail!("Page limit must be positive");
        }

        let candidates = self.inner.operations.in_range(request.from, request.to);
        let start = offset.min(candidates.len());
        let end = (offset + request.limit as usize).min(candidates.len());
        let mut page = OperationsPage::default();

        if offset == 0 {
            page.rejected.extend(self.inner.operations.undated.iter().cloned());
        }
        for entry in &candidates[start..end] {
            match &entry.record {
                Ok(op) => page.items.push(op.clone()),
                Err(rejected) => page.rejected.push(rejected.clone()),
            }
        }

        page.has_next = end < candidates.len();
        if page.has_next {
            page.next_cursor = end.to_string();
        }
        Ok(page)
    }
}

#[async_trait]
impl TradeSource for JsonFileSource {
    async fn fetch_trades(
        &self,
        _account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<TradeBatch> {
        let records = self
            .inner
            .trades
            .as_ref()
            .ok_or_else(|| anyhow!("No trades export configured"))?;

        let mut batch = TradeBatch {
            trades: Vec::new(),
            rejected: records.undated.clone(),
        };
        for entry in records.in_range(from, to) {
            match &entry.record {
                Ok(trade) => batch.trades.push(trade.clone()),
                Err(rejected) => batch.rejected.push(rejected.clone()),
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl InstrumentResolver for JsonFileSource {
    async fn resolve(&self, instrument_id: &str) -> Result<InstrumentSpec> {
        match self.inner.instruments.get(instrument_id) {
            Some(Ok(item)) => Ok(item.to_spec()),
            Some(Err(reason)) => Err(anyhow!("Instrument {} is malformed: {}", instrument_id, reason)),
            None => Err(anyhow!("Instrument {} not found", instrument_id)),
        }
    }
}

/// Paths for the three exports, as configured.
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub operations: PathBuf,
    pub trades: Option<PathBuf>,
    pub instruments: Option<PathBuf>,
}

impl ExportPaths {
    pub async fn open(&self) -> Result<JsonFileSource> {
        JsonFileSource::load(
            &self.operations,
            self.trades.as_deref(),
            self.instruments.as_deref(),
        )
        .await
    }
}
