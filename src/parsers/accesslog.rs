// File: src/parsers/accesslog.rs

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    default_benchmark_exclude, default_benchmark_prefix, is_benchmark, message_of, ParsedLine,
    DEFAULT_MARKER,
};
use crate::config::{self, default_message_field};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::record::{Outcome, Record, TIMESTAMP_FIELD};
use crate::time::{default_layouts, Timezone, TimestampResolver};

pub const NAME: &str = "parse_accesslog";

const TIMESTAMP_WIDTH: usize = 23;
/// The structured prefix starts after the timestamp and one space.
const PREFIX_START: usize = 24;
/// Unit separator + space between `key=value` pairs in the tail.
const PAIR_SEPARATOR: &str = "\u{1f} ";
/// Fields coerced to integers, zero when they do not parse.
const NUMERIC_FIELDS: [&str; 3] = ["status", "request_length", "latency-ms"];

const EXPECTED_LAYOUT: &str =
    "<timestamp> <service> <host> <level> [<file>] <thread> <method> [<line>] [<trace>] [<span>] <marker> key=value...";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AccesslogConfig {
    pub field: String,
    pub ignore_missing: bool,
    /// Pass lines without the marker through unchanged instead of failing them.
    pub ignore_malformed: bool,
    pub time_field: String,
    pub timezone: Timezone,
    pub layouts: Vec<String>,
    pub marker: String,
    pub benchmark_prefix: String,
    pub benchmark_exclude_prefix: Option<String>,
    /// Health-check request paths that are never indexed.
    pub drop_requests: Vec<String>,
}

impl Default for AccesslogConfig {
    fn default() -> Self {
        Self {
            field: default_message_field(),
            ignore_missing: false,
            ignore_malformed: true,
            time_field: TIMESTAMP_FIELD.to_string(),
            timezone: Timezone::default(),
            layouts: default_layouts(),
            marker: DEFAULT_MARKER.to_string(),
            benchmark_prefix: default_benchmark_prefix(),
            benchmark_exclude_prefix: default_benchmark_exclude(),
            drop_requests: vec!["/misc/ping".to_string(), "/actuator/health".to_string()],
        }
    }
}

/// What a single access log line turned into.
#[derive(Debug)]
pub enum AccessLine {
    Parsed(ParsedLine),
    Dropped,
    Malformed,
}

/// Parser for HTTP access logs: a structured prefix, the marker, then
/// `key=value` pairs separated by `\x1f `.
#[derive(Debug, Clone)]
pub struct AccesslogParser {
    config: AccesslogConfig,
    resolver: TimestampResolver,
    drop_patterns: Vec<String>,
}

impl AccesslogParser {
    pub fn new(config: AccesslogConfig) -> Result<Self> {
        if config.layouts.is_empty() {
            return Err(Error::config(NAME, "layouts must not be empty"));
        }
        if config.marker.is_empty() {
            return Err(Error::config(NAME, "marker must not be empty"));
        }

        Ok(Self {
            resolver: TimestampResolver::new(config.layouts.clone(), config.timezone),
            drop_patterns: config
                .drop_requests
                .iter()
                .map(|path| format!("request={}", path))
                .collect(),
            config,
        })
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Self::new(config::load(NAME, config)?)
    }

    pub fn parse_line(&self, msg: &str) -> AccessLine {
        // 1. Locate the marker; everything before it is the structured prefix.
        let Some(tag_idx) = msg.find(&self.config.marker) else {
            return AccessLine::Malformed;
        };
        if self.drop_patterns.iter().any(|p| msg.contains(p.as_str())) {
            debug!("health check request, dropping");
            return AccessLine::Dropped;
        }
        let Some(prefix) = msg.get(PREFIX_START..tag_idx) else {
            return AccessLine::Malformed;
        };

        let mut line = ParsedLine {
            timestamp: self.resolver.resolve(msg, Some(TIMESTAMP_WIDTH)),
            ..Default::default()
        };

        // 2. Prefix: "<service> <host> <level> [file] thread method [line] [trace] [span] "
        let sections: Vec<&str> = prefix.split(" [").collect();
        let head: Vec<&str> = sections[0].split(' ').collect();
        line.set("service", head[0]);

        if let Some(trace) = sections.get(3) {
            let trace_id = trace.trim_end().trim_end_matches(']');
            if is_benchmark(
                trace_id,
                &self.config.benchmark_prefix,
                self.config.benchmark_exclude_prefix.as_deref(),
            ) {
                debug!(trace_id, "benchmark traffic, dropping");
                return AccessLine::Dropped;
            }
        }

        let mut level = String::new();
        if sections.len() == 5 && head.len() == 3 {
            line.set("host", head[1]);
            level = head[2].to_uppercase();

            if let Some((file, rest)) = sections[1].split_once("] ") {
                line.set("file", file);
                if let Some((thread, method)) = rest.split_once(' ') {
                    line.set("thread", thread);
                    line.set("method", method);
                }
            }
            line.set("line", sections[2].trim_end().trim_end_matches(']'));
            line.set("trace_id", sections[3].trim_end().trim_end_matches(']'));
            line.set("span_id", sections[4].trim_end().trim_end_matches(']'));
        }

        // 3. Tail: key=value pairs, split at the first '='.
        if let Some(start) = msg.find(PAIR_SEPARATOR) {
            for pair in msg[start + PAIR_SEPARATOR.len()..].split(PAIR_SEPARATOR) {
                if let Some((key, value)) = pair.split_once('=') {
                    line.set(key, value);
                }
            }
        }

        // The prefix level always wins over a `level=` pair, even when empty.
        line.set("level", level);

        for key in NUMERIC_FIELDS {
            let number = match line.fields.get(key) {
                Some(Value::String(raw)) => raw.trim().parse::<i64>().unwrap_or(0),
                _ => continue,
            };
            line.set(key, number);
        }

        line.message = Some(msg.replace("\\u001f", "").replace('\u{1f}', ""));
        AccessLine::Parsed(line)
    }
}

impl Processor for AccesslogParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        let Some(msg) = message_of(&record, &self.config.field, self.config.ignore_missing)? else {
            return Ok(Outcome::Continue(record));
        };

        match self.parse_line(&msg) {
            AccessLine::Parsed(line) => {
                line.apply(&mut record, &self.config.field, &self.config.time_field)?;
                Ok(Outcome::Continue(record))
            }
            AccessLine::Dropped => Ok(Outcome::Drop),
            AccessLine::Malformed if self.config.ignore_malformed => {
                debug!("malformed access log, passing record through");
                Ok(Outcome::Continue(record))
            }
            AccessLine::Malformed => Err(Error::LogFormat {
                expected: EXPECTED_LAYOUT.to_string(),
            }),
        }
    }
}
