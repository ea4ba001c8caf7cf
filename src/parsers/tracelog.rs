// File: src/parsers/tracelog.rs

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{message_of, FileMeta, ParsedLine};
use crate::config::{self, default_message_field, default_path_field};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::record::{Outcome, Record};
use crate::time::{default_layouts, Timezone, TimestampResolver};

pub const NAME: &str = "parse_vehicle_tracelog";

const MSG_MARKER: &str = "##MSG##";
const HEADER_PREFIX: &str = "x-header_";

const TRACE_PATTERN: &str = r"^(\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2}\.\d{3})\s+(\d+)\s+(\d+)\s+([a-zA-Z]+)\s+(.*):\s*##MSG##\s*\[(\w*)\]\s*\[(\w*)\]\s*\[(\w*)\]\s*\[([^\[\]]*)\]\s*\[([^\[\]]*)\]\s+";

fn trace_regex() -> &'static Regex {
    static TRACE_REGEX: OnceLock<Regex> = OnceLock::new();
    TRACE_REGEX.get_or_init(|| Regex::new(TRACE_PATTERN).expect("Invalid trace log regex"))
}

/// Canonical name for an Android-style level letter.
pub fn canonical_level(raw: &str) -> String {
    let known = match raw {
        "V" => "VERBOSE",
        "D" => "DEBUG",
        "I" => "INFO",
        "W" => "WARN",
        "E" => "ERROR",
        "F" => "FATAL",
        other => return other.to_uppercase(),
    };
    known.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TracelogConfig {
    pub field: String,
    pub ignore_missing: bool,
    pub time_field: String,
    pub timezone: Timezone,
    pub layouts: Vec<String>,
    /// Field holding the uploaded file path the header is decoded from.
    pub path_field: String,
}

impl Default for TracelogConfig {
    fn default() -> Self {
        Self {
            field: default_message_field(),
            ignore_missing: true,
            time_field: "logtime".to_string(),
            timezone: Timezone::default(),
            layouts: default_layouts(),
            path_field: default_path_field(),
        }
    }
}

/// Parser for vehicle trace logs:
///
/// ```text
/// <date> <time> <pid> <tid> <level> <tag>: ##MSG## [trace] [span] [parent] [network] [user] <message>##MSG##
/// ```
#[derive(Debug, Clone)]
pub struct TracelogParser {
    config: TracelogConfig,
    resolver: TimestampResolver,
}

impl TracelogParser {
    pub fn new(config: TracelogConfig) -> Result<Self> {
        if config.layouts.is_empty() {
            return Err(Error::config(NAME, "layouts must not be empty"));
        }
        Ok(Self {
            resolver: TimestampResolver::new(config.layouts.clone(), config.timezone),
            config,
        })
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Self::new(config::load(NAME, config)?)
    }

    /// `None` when the line does not have the trace shape.
    pub fn parse_line(&self, msg: &str, meta: &FileMeta) -> Option<ParsedLine> {
        let caps = trace_regex().captures(msg)?;
        let whole = caps.get(0)?;
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());

        let mut line = ParsedLine::default();
        meta.write_into(&mut line, HEADER_PREFIX, "created_at");

        let time = group(1);
        line.timestamp = self.resolver.resolve(time, None);
        line.set("time", time);
        line.set("pid", group(2).parse::<i64>().unwrap_or(0));
        line.set("tid", group(3).parse::<i64>().unwrap_or(0));
        line.set("level", canonical_level(group(4)));
        line.set("tag", group(5));
        line.set("trace_id", group(6));
        line.set("span_id", group(7));
        line.set("parent_span_id", group(8));
        line.set("network", group(9));
        line.set("user_id", group(10));

        let rest = &msg[whole.end()..];
        let body = match rest.find(MSG_MARKER) {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        line.message = Some(body.to_string());

        Some(line)
    }
}

impl Processor for TracelogParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        let Some(msg) = message_of(&record, &self.config.field, self.config.ignore_missing)? else {
            return Ok(Outcome::Continue(record));
        };

        let path = record.get_str(&self.config.path_field)?;
        let Some(meta) = FileMeta::parse(path) else {
            debug!(path, "file path carries no upload header, dropping");
            return Ok(Outcome::Drop);
        };

        let Some(line) = self.parse_line(&msg, &meta) else {
            debug!("not a trace log line, dropping");
            return Ok(Outcome::Drop);
        };

        line.apply(&mut record, &self.config.field, &self.config.time_field)?;
        Ok(Outcome::Continue(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    const PATH: &str = "/vlog/adcm/trace.log.1@adcm@6c9b10c6fd944651@tracelog@1703159620000@1703160317000";
    const LINE: &str = "2023-12-21 20:34:38.005 3810  6369 I TraceTag: ##MSG## [abc123] [def456] [] [wifi] [user-1] payload text##MSG## trailing";

    fn run(msg: &str, path: &str) -> Result<Outcome> {
        TracelogParser::from_config(&Value::Null)
            .unwrap()
            .run(Record::from_json(json!({
                "message": msg,
                "log": {"file": {"path": path}},
            })))
    }

    #[test]
    fn matching_line_is_structured() {
        let record = run(LINE, PATH).unwrap().into_record().unwrap();
        let f = &record.fields;

        assert_eq!(f["time"], json!("2023-12-21 20:34:38.005"));
        assert_eq!(f["logtime"], json!("2023-12-21T12:34:38.005Z"));
        assert_eq!(f["pid"], json!(3810));
        assert_eq!(f["tid"], json!(6369));
        assert_eq!(f["level"], json!("INFO"));
        assert_eq!(f["tag"], json!("TraceTag"));
        assert_eq!(f["trace_id"], json!("abc123"));
        assert_eq!(f["span_id"], json!("def456"));
        assert_eq!(f["parent_span_id"], json!(""));
        assert_eq!(f["network"], json!("wifi"));
        assert_eq!(f["user_id"], json!("user-1"));
        assert_eq!(f["message"], json!("payload text"));

        assert_eq!(f["x-header_filename"], json!("trace.log"));
        assert_eq!(f["x-header_ecu"], json!("adcm"));
        assert_eq!(f["x-header_vid"], json!("6c9b10c6fd944651"));
        assert_eq!(f["x-header_log_type"], json!("tracelog"));
        assert_eq!(f["x-header_created_at"], json!("1703159620000"));
        assert_eq!(f["x-header_uploaded_at"], json!("1703160317000"));
    }

    #[test]
    fn message_runs_to_end_without_closing_marker() {
        let msg = "2023-12-21 20:34:38.005 1 2 W Tag: ##MSG## [a] [b] [c] [d] [e] no closing marker";
        let record = run(msg, PATH).unwrap().into_record().unwrap();
        assert_eq!(record.fields["message"], json!("no closing marker"));
        assert_eq!(record.fields["level"], json!("WARN"));
    }

    #[test]
    fn non_matching_line_is_dropped() {
        assert!(run("just some free text", PATH).unwrap().is_drop());
    }

    #[test]
    fn short_path_is_dropped() {
        assert!(run(LINE, "/vlog/trace.log@adcm@vid").unwrap().is_drop());
    }

    #[test]
    fn missing_path_is_an_error() {
        let parser = TracelogParser::from_config(&Value::Null).unwrap();
        let err = parser
            .run(Record::from_json(json!({"message": LINE})))
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { field } if field == "log.file.path"));
    }

    #[rstest]
    #[case("V", "VERBOSE")]
    #[case("D", "DEBUG")]
    #[case("E", "ERROR")]
    #[case("F", "FATAL")]
    #[case("info", "INFO")]
    #[case("Trace", "TRACE")]
    fn level_lookup(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(canonical_level(raw), expected);
    }
}
