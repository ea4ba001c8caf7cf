// File: src/parsers/mod.rs

pub mod accesslog;
pub mod cdc;
pub mod embedded;
pub mod serverlog;
pub mod tablog;
pub mod tracelog;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::Record;

/// Marker producers put around embedded payloads.
pub const DEFAULT_MARKER: &str = "##JIDU##";

/// Trace ids load-test traffic is tagged with.
pub const BENCHMARK_PREFIX: &str = "00000000";

/// The doubled benchmark prefix is legitimate traffic from one upstream caller.
pub fn default_benchmark_exclude() -> Option<String> {
    Some(BENCHMARK_PREFIX.repeat(2))
}

pub fn default_benchmark_prefix() -> String {
    BENCHMARK_PREFIX.to_string()
}

/// Result of tokenizing one log line, applied to the record in one go.
#[derive(Debug, Default)]
pub struct ParsedLine {
    pub fields: Map<String, Value>,
    pub message: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub remove: Vec<String>,
    /// Decoded payload keys, written last so they win over parsed fields.
    pub merge: Map<String, Value>,
}

impl ParsedLine {
    pub(crate) fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub(crate) fn apply(self, record: &mut Record, message_field: &str, time_field: &str) -> Result<()> {
        for path in &self.remove {
            record.delete_value(path);
        }
        record.fields.extend(self.fields);
        if let Some(message) = self.message {
            record
                .put_value(message_field, message)
                .map_err(|e| Error::Compute(e.to_string()))?;
        }
        if let Some(ts) = self.timestamp {
            record.set_time(time_field, ts)?;
        }
        record.fields.extend(self.merge);
        Ok(())
    }
}

/// Reads the raw message text. `Ok(None)` means the field is absent and the
/// caller tolerates that, so the record passes through untouched.
pub(crate) fn message_of(record: &Record, field: &str, ignore_missing: bool) -> Result<Option<String>> {
    match record.get_str(field) {
        Ok(text) => Ok(Some(text.to_string())),
        Err(Error::MissingField { .. }) if ignore_missing => {
            debug!(field, "message field missing, passing record through");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Strips one leading and one trailing character, `[abc]` -> `abc`.
pub(crate) fn trim_brackets(s: &str) -> &str {
    let mut chars = s.chars();
    match (chars.next(), chars.next_back()) {
        (Some(_), Some(_)) => chars.as_str(),
        _ => s,
    }
}

/// Benchmark traffic filter: `prefix` marks load-test trace ids, `exclude`
/// carves out ids that merely happen to start with it.
pub(crate) fn is_benchmark(trace_id: &str, prefix: &str, exclude: Option<&str>) -> bool {
    if prefix.is_empty() || !trace_id.starts_with(prefix) {
        return false;
    }
    match exclude {
        Some(exclude) if !exclude.is_empty() => !trace_id.starts_with(exclude),
        _ => true,
    }
}

/// Metadata encoded in uploaded vehicle log file names:
/// `<dir>/<name>.<seq>@<ecu>@<vid>@<log_type>@<modified_ms>@<uploaded_ms>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub filename: String,
    pub ecu: String,
    pub vid: String,
    pub log_type: String,
    pub modified_at: String,
    pub uploaded_at: String,
}

impl FileMeta {
    /// `None` when the path has fewer than six `@` separated segments.
    pub fn parse(path: &str) -> Option<Self> {
        let items: Vec<&str> = path.split('@').collect();
        if items.len() < 6 {
            return None;
        }

        let base = items[0].rsplit('/').next().unwrap_or(items[0]);
        let filename = match base.rfind('.') {
            Some(idx) => &base[..idx],
            None => base,
        };

        Some(Self {
            filename: filename.to_string(),
            ecu: items[1].to_string(),
            vid: items[2].to_string(),
            log_type: items[3].to_string(),
            modified_at: items[4].to_string(),
            uploaded_at: items[5].to_string(),
        })
    }

    /// Writes the six header fields, each key prefixed with `prefix`;
    /// the modification time goes under `prefix` + `modified_key`.
    pub(crate) fn write_into(&self, line: &mut ParsedLine, prefix: &str, modified_key: &str) {
        line.set(&format!("{}filename", prefix), self.filename.as_str());
        line.set(&format!("{}ecu", prefix), self.ecu.as_str());
        line.set(&format!("{}vid", prefix), self.vid.as_str());
        line.set(&format!("{}log_type", prefix), self.log_type.as_str());
        line.set(&format!("{}{}", prefix, modified_key), self.modified_at.as_str());
        line.set(&format!("{}uploaded_at", prefix), self.uploaded_at.as_str());
    }
}
