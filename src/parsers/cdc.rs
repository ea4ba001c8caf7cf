// File: src/parsers/cdc.rs

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{message_of, FileMeta, ParsedLine};
use crate::config::{self, default_message_field, default_path_field};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::record::{Outcome, Record, TIMESTAMP_FIELD};
use crate::time::{parse_tolerance, Timezone};

pub const NAME: &str = "parse_cdc_alog";

/// `12-21 20:34:38.005963`, no year.
const DATE_WIDTH: usize = 21;
const DATE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Stand-in year while the real one is unknown; a leap year so `02-29` parses.
const PLACEHOLDER_YEAR: i32 = 2000;
/// Scratch object the shipper attaches; never indexed.
const SCRATCH_FIELD: &str = "fields";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CdcConfig {
    pub field: String,
    pub ignore_missing: bool,
    pub time_field: String,
    pub timezone: Timezone,
    pub path_field: String,
    /// Maximum distance from now, either direction, e.g. `"72h"`.
    pub allow_old: String,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            field: default_message_field(),
            ignore_missing: false,
            time_field: TIMESTAMP_FIELD.to_string(),
            timezone: Timezone::default(),
            path_field: default_path_field(),
            allow_old: "72h".to_string(),
        }
    }
}

/// Parser for CDC audit logs (Android logcat dumps uploaded from the car).
///
/// The line only carries month and day; the year comes from the upload
/// file's modification time.
#[derive(Debug, Clone)]
pub struct CdcParser {
    config: CdcConfig,
    tolerance: TimeDelta,
    now: fn() -> DateTime<Utc>,
}

impl CdcParser {
    pub fn new(config: CdcConfig) -> Result<Self> {
        let tolerance = parse_tolerance(&config.allow_old)
            .and_then(|d| TimeDelta::from_std(d).map_err(|e| e.to_string()))
            .map_err(Error::Compute)?;

        Ok(Self {
            config,
            tolerance,
            now: Utc::now,
        })
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Self::new(config::load(NAME, config)?)
    }

    /// Replaces the wall clock the staleness check compares against.
    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Parses the yearless date prefix against a placeholder year.
    pub fn parse_date(date: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&format!("{}-{}", PLACEHOLDER_YEAR, date), DATE_LAYOUT)
            .map_err(|_| Error::Compute(format!("invalid log time: {}", date)))
    }

    /// Resolves the line timestamp, borrowing the year from `modified_ms`.
    pub fn resolve_time(&self, date: NaiveDateTime, modified_ms: &str) -> Result<DateTime<Utc>> {
        let millis: i64 = modified_ms
            .parse()
            .map_err(|_| Error::Compute(format!("invalid file modify time: {}", modified_ms)))?;
        let modified = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| Error::Compute(format!("invalid file modify time: {}", modified_ms)))?;
        let year = modified.with_timezone(&self.config.timezone.offset()).year();

        date.with_year(year)
            .and_then(|naive| self.config.timezone.localize(naive))
            .ok_or_else(|| Error::Compute(format!("invalid log time: {} in {}", date, year)))
    }

    fn is_stale(&self, ts: DateTime<Utc>) -> bool {
        ((self.now)() - ts).abs() > self.tolerance
    }
}

impl Processor for CdcParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        let Some(msg) = message_of(&record, &self.config.field, self.config.ignore_missing)? else {
            return Ok(Outcome::Continue(record));
        };
        let Some(date) = msg.get(..DATE_WIDTH).filter(|_| msg.len() > DATE_WIDTH) else {
            debug!(len = msg.len(), "line shorter than its date prefix, dropping");
            return Ok(Outcome::Drop);
        };
        let date = Self::parse_date(date)?;

        let path = record.get_str(&self.config.path_field)?;
        let Some(meta) = FileMeta::parse(path) else {
            debug!(path, "file path carries no upload header, dropping");
            return Ok(Outcome::Drop);
        };

        let ts = self.resolve_time(date, &meta.modified_at)?;
        if self.is_stale(ts) {
            debug!(logtime = %ts, "log time too far from now, dropping");
            return Ok(Outcome::Drop);
        }

        let mut line = ParsedLine {
            timestamp: Some(ts),
            remove: vec![self.config.path_field.clone(), SCRATCH_FIELD.to_string()],
            ..Default::default()
        };
        meta.write_into(&mut line, "", "modified_at");

        line.apply(&mut record, &self.config.field, &self.config.time_field)?;
        Ok(Outcome::Continue(record))
    }
}
