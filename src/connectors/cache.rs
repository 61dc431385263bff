// src/connectors/cache.rs
use crate::connectors::traits::InstrumentResolver;
use crate::types::InstrumentSpec;
use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

/// Ленивый кэш инструментов на время одного прогона.
/// Specs are indexed by the requested id, UID and FIGI.
pub struct InstrumentCache {
    resolver: Box<dyn InstrumentResolver>,
    by_id: HashMap<String, InstrumentSpec>,
    lookups: usize,
}

impl InstrumentCache {
    pub fn new(resolver: Box<dyn InstrumentResolver>) -> Self {
        Self {
            resolver,
            by_id: HashMap::new(),
            lookups: 0,
        }
    }

    pub async fn resolve(&mut self, instrument_id: &str) -> Result<InstrumentSpec> {
        if let Some(spec) = self.by_id.get(instrument_id) {
            return Ok(spec.clone());
        }

        self.lookups += 1;
        let spec = self.resolver.resolve(instrument_id).await?;
        debug!(
            "Resolved {} -> {} (lot {}, derivative: {})",
            instrument_id,
            spec.ticker,
            spec.lot,
            spec.is_derivative()
        );

        for key in [instrument_id, spec.instrument_id.as_str(), spec.figi.as_str()] {
            if !key.is_empty() {
                self.by_id.insert(key.to_string(), spec.clone());
            }
        }
        Ok(spec)
    }

    /// Number of calls that reached the underlying resolver.
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}
