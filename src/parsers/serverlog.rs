// File: src/parsers/serverlog.rs

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::embedded::{decode_embedded, embedded_region};
use super::{
    default_benchmark_exclude, default_benchmark_prefix, is_benchmark, message_of, trim_brackets,
    ParsedLine, DEFAULT_MARKER,
};
use crate::config::{self, default_message_field};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::record::{Outcome, Record, TIMESTAMP_FIELD};
use crate::time::{default_layouts, Timezone, TimestampResolver};

pub const NAME: &str = "parse_serverlog";

/// `2023-09-18 11:32:58.511`
const TIMESTAMP_WIDTH: usize = 23;
const TOKEN_COUNT: usize = 12;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerlogConfig {
    pub field: String,
    pub ignore_missing: bool,
    pub time_field: String,
    pub timezone: Timezone,
    pub layouts: Vec<String>,
    pub marker: String,
    pub benchmark_prefix: String,
    pub benchmark_exclude_prefix: Option<String>,
}

impl Default for ServerlogConfig {
    fn default() -> Self {
        Self {
            field: default_message_field(),
            ignore_missing: false,
            time_field: TIMESTAMP_FIELD.to_string(),
            timezone: Timezone::default(),
            layouts: default_layouts(),
            marker: DEFAULT_MARKER.to_string(),
            benchmark_prefix: default_benchmark_prefix(),
            benchmark_exclude_prefix: default_benchmark_exclude(),
        }
    }
}

/// Parser for service logs:
///
/// ```text
/// <date> <time> <service> <host> <level> [<thread>] <class> <method> [<line>] [<trace>] [<span>] <message>
/// ```
///
/// The message may carry a JSON payload between two markers; its top-level
/// keys are merged into the record.
#[derive(Debug, Clone)]
pub struct ServerlogParser {
    config: ServerlogConfig,
    resolver: TimestampResolver,
    doubled_marker: String,
}

impl ServerlogParser {
    pub fn new(config: ServerlogConfig) -> Result<Self> {
        if config.layouts.is_empty() {
            return Err(Error::config(NAME, "layouts must not be empty"));
        }
        if config.marker.is_empty() {
            return Err(Error::config(NAME, "marker must not be empty"));
        }

        Ok(Self {
            resolver: TimestampResolver::new(config.layouts.clone(), config.timezone),
            doubled_marker: config.marker.repeat(2),
            config,
        })
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Self::new(config::load(NAME, config)?)
    }

    /// Tokenizes one line. `None` means drop: malformed shape or benchmark traffic.
    pub fn parse_line(&self, msg: &str) -> Option<ParsedLine> {
        let mut line = ParsedLine {
            timestamp: self.resolver.resolve(msg, Some(TIMESTAMP_WIDTH)),
            ..Default::default()
        };

        // 1. Bounded split keeps the trailing message (and any payload) whole.
        let items: Vec<&str> = msg.splitn(TOKEN_COUNT, ' ').collect();
        if items.len() < TOKEN_COUNT {
            debug!(tokens = items.len(), "malformed service log, dropping");
            return None;
        }

        // 2. Load-test traffic never reaches the index.
        let trace_id = trim_brackets(items[9]);
        if is_benchmark(
            trace_id,
            &self.config.benchmark_prefix,
            self.config.benchmark_exclude_prefix.as_deref(),
        ) {
            debug!(trace_id, "benchmark traffic, dropping");
            return None;
        }

        line.set("service", items[2]);
        line.set("host", items[3]);
        line.set("level", items[4].to_uppercase());

        // 3. A numeric line token marks the full layout; legacy lines stop here.
        let marker = self.config.marker.as_str();
        let mut begin = None;
        let mut message = msg;
        if let Ok(number) = trim_brackets(items[8]).parse::<i64>() {
            line.set("thread", trim_brackets(items[5]));
            line.set("class", items[6]);
            line.set("method", items[7]);
            line.set("line", number);
            line.set("trace_id", trace_id);
            line.set("span_id", trim_brackets(items[10]));

            if let Some(idx) = msg.find(&self.doubled_marker).filter(|&idx| idx > 0) {
                begin = Some(idx);
                message = &msg[idx + self.doubled_marker.len()..];
            } else if let Some(idx) = msg.find(marker).filter(|&idx| idx > 0) {
                begin = Some(idx);
                message = &msg[idx + marker.len()..];
            } else {
                message = items[11];
            }
        }
        line.message = Some(message.to_string());

        // 4. Payload between the first and last marker.
        if let Some(payload) = begin.and_then(|begin| embedded_region(msg, begin, marker)) {
            match decode_embedded(payload) {
                Ok(object) => line.merge = object,
                Err(e) => line.set("json_error", e.to_string()),
            }
        }

        Some(line)
    }
}

impl Processor for ServerlogParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        let Some(msg) = message_of(&record, &self.config.field, self.config.ignore_missing)? else {
            return Ok(Outcome::Continue(record));
        };
        let Some(line) = self.parse_line(&msg) else {
            return Ok(Outcome::Drop);
        };

        line.apply(&mut record, &self.config.field, &self.config.time_field)?;
        Ok(Outcome::Continue(record))
    }
}
