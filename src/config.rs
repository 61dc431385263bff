// src/config.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::warn;

use crate::connectors::file::ExportPaths;
use crate::core::engine::EngineParams;
use crate::core::report::Rounding;
use crate::types::WindowKind;
use crate::utils::tz::{local_midnight, parse_tz};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub account_id: String,
    pub timezone: String,
    /// Inclusive lower bound, local date. Defaults to a year before today.
    pub since: Option<NaiveDate>,
    /// Exclusive upper bound, local date. Defaults to tomorrow.
    pub until: Option<NaiveDate>,
    /// Comma-separated window kinds.
    pub windows: String,
    pub operations_file: PathBuf,
    pub trades_file: Option<PathBuf>,
    pub instruments_file: Option<PathBuf>,
    pub out: PathBuf,
    pub include_roundtrips: bool,
    pub include_instruments: bool,
    pub cash_places: u32,
    pub report_places: u32,
    pub page_size: u32,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Self::defaults()?
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").try_parsing(true));

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("timezone", "Europe/Moscow")?
            .set_default("windows", "day,week,month,year")?
            .set_default("operations_file", "data/operations.json")?
            .set_default("out", "out/stats.json")?
            .set_default("include_roundtrips", true)?
            .set_default("include_instruments", false)?
            .set_default("cash_places", 4)?
            .set_default("report_places", 2)?
            .set_default("page_size", 1000)?
            .set_default("log_level", "info")
    }

    pub fn window_kinds(&self) -> Result<BTreeSet<WindowKind>> {
        let kinds = self
            .windows
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| k.parse::<WindowKind>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        if kinds.is_empty() {
            bail!("No window kinds configured");
        }
        Ok(kinds)
    }

    /// Resolves the period against `now` and validates everything else.
    pub fn engine_params(&self, now: DateTime<Utc>) -> Result<EngineParams> {
        if self.account_id.trim().is_empty() {
            bail!("account_id is required (APP_ACCOUNT_ID)");
        }
        if self.page_size == 0 {
            bail!("page_size must be positive");
        }

        let tz = parse_tz(&self.timezone)?;
        let today = now.with_timezone(&tz).date_naive();
        let since = match self.since {
            Some(d) => d,
            None => today
                .checked_sub_days(Days::new(365))
                .context("since out of range")?,
        };
        let until = match self.until {
            Some(d) => d,
            None => today
                .checked_add_days(Days::new(1))
                .context("until out of range")?,
        };

        let include_roundtrips = self.include_roundtrips && self.trades_file.is_some();
        if self.include_roundtrips && !include_roundtrips {
            warn!("Roundtrips requested but no trades_file configured, skipping them");
        }

        Ok(EngineParams {
            account_id: self.account_id.trim().to_string(),
            tz,
            since: local_midnight(since, &tz).with_timezone(&Utc),
            until: local_midnight(until, &tz).with_timezone(&Utc),
            kinds: self.window_kinds()?,
            include_roundtrips,
            include_instruments: self.include_instruments,
            rounding: Rounding {
                cash_places: self.cash_places,
                report_places: self.report_places,
            },
            page_size: self.page_size,
        })
    }

    pub fn export_paths(&self) -> ExportPaths {
        ExportPaths {
            operations: self.operations_file.clone(),
            trades: self.trades_file.clone(),
            instruments: self.instruments_file.clone(),
        }
    }
}
