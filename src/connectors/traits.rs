// src/connectors/traits.rs
use crate::types::{InstrumentSpec, Operation, Trade};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};

/// Cursor request for executed operations in `[from, to)`.
#[derive(Debug, Clone)]
pub struct OperationsRequest {
    pub account_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub cursor: String,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct OperationsPage {
    pub items: Vec<Operation>,
    /// Records on this page that could not be turned into an `Operation`.
    pub rejected: Vec<RejectedRecord>,
    pub has_next: bool,
    pub next_cursor: String,
}

/// Trades in range plus the records that could not be read.
#[derive(Debug, Clone, Default)]
pub struct TradeBatch {
    pub trades: Vec<Trade>,
    pub rejected: Vec<RejectedRecord>,
}

#[async_trait]
pub trait OperationSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch_page(&self, request: &OperationsRequest) -> Result<OperationsPage>;
}

#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch_trades(
        &self,
        account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<TradeBatch>;
}

#[async_trait]
pub trait InstrumentResolver: Send + Sync {
    /// Looks up an instrument by UID or FIGI. Fails when it is unknown.
    async fn resolve(&self, instrument_id: &str) -> Result<InstrumentSpec>;
}

/// Lazily walks the cursor pages of `source`.
///
/// A failed page is yielded once and ends the stream.
pub fn operation_pages<'a>(
    source: &'a dyn OperationSource,
    request: OperationsRequest,
) -> impl Stream<Item = Result<OperationsPage>> + 'a {
    stream::unfold(Some(request), move |state| async move {
        let request = state?;
        match source.fetch_page(&request).await {
            Ok(page) => {
                let next = page.has_next.then(|| OperationsRequest {
                    cursor: page.next_cursor.clone(),
                    ..request
                });
                Some((Ok(page), next))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
