// src/time.rs

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc,
};
use humantime::parse_duration;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Layout every line format in this crate writes its timestamps with.
pub const DEFAULT_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Fixed UTC offset naive log timestamps are interpreted in.
///
/// Accepts `"UTC"`, `"Local"` (offset of the host at construction time) or
/// an explicit offset such as `"+08:00"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Timezone(FixedOffset);

impl Timezone {
    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    /// Attaches this zone to a naive wall-clock time.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.0
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl Default for Timezone {
    fn default() -> Self {
        // Every producer this crate was built for logs in China Standard Time.
        Timezone(FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()))
    }
}

impl FromStr for Timezone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "UTC" | "utc" | "Z" => Ok(Timezone(Utc.fix())),
            "Local" | "local" => Ok(Timezone(Local::now().offset().fix())),
            other => other
                .parse::<FixedOffset>()
                .map(Timezone)
                .map_err(|_| format!("Could not parse timezone: {}", other)),
        }
    }
}

impl TryFrom<String> for Timezone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tries an ordered list of layouts against the head of a log line.
#[derive(Debug, Clone)]
pub struct TimestampResolver {
    layouts: Vec<String>,
    timezone: Timezone,
}

impl TimestampResolver {
    pub fn new(layouts: Vec<String>, timezone: Timezone) -> Self {
        Self { layouts, timezone }
    }

    /// Parses `text` (or only its first `width` bytes) with each layout in
    /// turn. First success wins; `None` when nothing matches or the text is
    /// shorter than `width`.
    pub fn resolve(&self, text: &str, width: Option<usize>) -> Option<DateTime<Utc>> {
        let candidate = match width {
            Some(width) => text.get(..width)?,
            None => text,
        };

        self.layouts
            .iter()
            .find_map(|layout| parse_with_layout(candidate, layout, &self.timezone))
    }
}

fn parse_with_layout(text: &str, layout: &str, timezone: &Timezone) -> Option<DateTime<Utc>> {
    // Layouts carrying their own offset (%z, %:z) win over the configured zone.
    if let Ok(dt) = DateTime::parse_from_str(text, layout) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, layout) {
        return timezone.localize(naive);
    }
    NaiveDate::parse_from_str(text, layout)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| timezone.localize(naive))
}

/// Parses a human duration such as `"24h"` or `"90m"`.
pub fn parse_tolerance(value: &str) -> Result<Duration, String> {
    parse_duration(value.trim()).map_err(|e| format!("Could not parse duration '{}': {}", value, e))
}

/// Layout list used when a parser config does not name its own.
pub(crate) fn default_layouts() -> Vec<String> {
    vec![DEFAULT_LAYOUT.to_string()]
}
