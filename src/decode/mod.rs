// src/decode/mod.rs

pub mod expand;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use self::expand::{expand_keys, ExpandConflictError};
use crate::config;
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::record::{Outcome, Record, TIMESTAMP_FIELD};

pub const NAME: &str = "decode_json_fields";

/// Field the structured decode error is attached under.
pub const ERROR_FIELD: &str = "error";

const METADATA_KEY: &str = "@metadata";
const TYPE_KEY: &str = "type";

/// Why one configured field could not be decoded. Never fatal to the record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("parsing input as JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Expand(#[from] ExpandConflictError),

    #[error("failed to add target to root")]
    RootNotObject,

    #[error("{0}")]
    Reserved(String),
}

impl DecodeError {
    /// The `error` object attached to the record.
    pub fn to_error_object(&self, field: &str, data: &str) -> Value {
        match self {
            DecodeError::Parse(_) => json!({
                "message": self.to_string(),
                "type": "json",
                "field": field,
                "data": data,
            }),
            _ => json!({
                "message": self.to_string(),
                "type": "json",
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DecodeConfig {
    /// Either a single field name or a list of them.
    #[serde(deserialize_with = "one_or_many")]
    pub fields: Vec<String>,
    pub max_depth: usize,
    pub process_array: bool,
    /// Absent writes back to the source field, `""` merges into the root.
    pub target: Option<String>,
    pub overwrite_keys: bool,
    pub add_error_key: bool,
    pub expand_keys: bool,
    pub document_id: Option<String>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            max_depth: 1,
            process_array: false,
            target: None,
            overwrite_keys: false,
            add_error_key: false,
            expand_keys: false,
            document_id: None,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(field) => vec![field],
        OneOrMany::Many(fields) => fields,
    })
}

/// Trimmed text that starts and ends like a JSON object or array.
pub fn looks_structured(text: &str) -> bool {
    let text = text.trim();
    text.len() > 1
        && ((text.starts_with('{') && text.ends_with('}'))
            || (text.starts_with('[') && text.ends_with(']')))
}

/// Parses `text` and re-decodes JSON-looking string members until `max_depth`
/// levels have been decoded in total.
///
/// `Ok(None)` means the text is an array and arrays are not processed, so the
/// caller keeps the original string.
pub fn decode_text(
    text: &str,
    max_depth: usize,
    process_array: bool,
) -> std::result::Result<Option<Value>, serde_json::Error> {
    let mut value: Value = serde_json::from_str(text)?;
    if value.is_array() && !process_array {
        return Ok(None);
    }
    redecode(&mut value, max_depth.saturating_sub(1), process_array);
    Ok(Some(value))
}

fn redecode(value: &mut Value, depth: usize, process_array: bool) {
    if depth == 0 {
        return;
    }
    match value {
        Value::Object(map) => {
            for member in map.values_mut() {
                redecode_member(member, depth, process_array);
            }
        }
        Value::Array(items) => {
            for member in items.iter_mut() {
                redecode_member(member, depth, process_array);
            }
        }
        _ => {}
    }
}

fn redecode_member(member: &mut Value, depth: usize, process_array: bool) {
    let Value::String(text) = member else {
        return;
    };
    if !looks_structured(text) {
        return;
    }
    // Undecodable members stay as they are.
    if let Ok(Some(decoded)) = decode_text(text, depth, process_array) {
        *member = decoded;
    }
}

/// Recursive overwrite of `dst` with `src`; objects on both sides are merged.
fn deep_update(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_update(existing, incoming)
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

fn take_document_id(decoded: &mut Value, key: &str) -> Option<String> {
    let Value::Object(map) = decoded else {
        return None;
    };
    let id = match expand::get_path(map, key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    expand::delete_path(map, key);
    Some(id)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Decodes JSON text held in record fields.
#[derive(Debug, Clone)]
pub struct JsonFieldDecoder {
    config: DecodeConfig,
}

impl JsonFieldDecoder {
    pub fn new(config: DecodeConfig) -> Result<Self> {
        if config.max_depth < 1 {
            return Err(Error::config(NAME, "max_depth must be at least 1"));
        }
        Ok(Self { config })
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Self::new(config::load(NAME, config)?)
    }

    fn decode_field(
        &self,
        record: &mut Record,
        field: &str,
        text: &str,
    ) -> std::result::Result<(), DecodeError> {
        let Some(mut decoded) = decode_text(text, self.config.max_depth, self.config.process_array)?
        else {
            return Ok(());
        };

        if self.config.expand_keys {
            if let Value::Object(map) = &mut decoded {
                expand_keys(map)?;
            }
        }

        let id = self
            .config
            .document_id
            .as_deref()
            .and_then(|key| take_document_id(&mut decoded, key));

        let target = self.config.target.as_deref().unwrap_or(field);
        let mut reserved = None;
        if target.is_empty() {
            let Value::Object(map) = decoded else {
                return Err(DecodeError::RootNotObject);
            };
            reserved = self.write_root(record, map);
        } else {
            record.put_value(target, decoded)?;
        }

        if let Some(id) = id {
            record.set_id(id);
        }
        match reserved {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Merges a decoded object into the record root. Returns the last
    /// reserved-key failure; the remaining keys are merged regardless.
    fn write_root(&self, record: &mut Record, mut map: Map<String, Value>) -> Option<DecodeError> {
        if !self.config.overwrite_keys {
            map.remove(TIMESTAMP_FIELD);
            map.remove(METADATA_KEY);
            deep_update(&mut record.fields, map);
            return None;
        }

        let mut failure = None;
        match map.remove(TIMESTAMP_FIELD) {
            Some(Value::String(text)) => match parse_timestamp(&text) {
                Some(ts) => record.timestamp = Some(ts),
                None => {
                    failure = Some(DecodeError::Reserved(format!(
                        "@timestamp not overwritten (parse error on {})",
                        text
                    )))
                }
            },
            Some(_) => {
                failure = Some(DecodeError::Reserved(
                    "@timestamp not overwritten (not string)".to_string(),
                ))
            }
            None => {}
        }

        match map.remove(METADATA_KEY) {
            Some(Value::Object(meta)) => deep_update(&mut record.metadata, meta),
            Some(_) => failure = Some(DecodeError::Reserved("failed to update @metadata".to_string())),
            None => {}
        }

        match map.get(TYPE_KEY) {
            Some(Value::String(kind)) if kind.is_empty() || kind.starts_with('_') => {
                failure = Some(DecodeError::Reserved(format!(
                    "type not overwritten (invalid value [{}])",
                    kind
                )));
                map.remove(TYPE_KEY);
            }
            Some(Value::String(_)) | None => {}
            Some(_) => {
                failure = Some(DecodeError::Reserved(
                    "type not overwritten (not string)".to_string(),
                ));
                map.remove(TYPE_KEY);
            }
        }

        deep_update(&mut record.fields, map);
        failure
    }
}

impl Processor for JsonFieldDecoder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        for field in &self.config.fields {
            // Absent and non-string fields are not decode candidates.
            let text = match record.get_value(field) {
                Some(Value::String(text)) => text.clone(),
                _ => continue,
            };

            if let Err(e) = self.decode_field(&mut record, field, &text) {
                debug!(field = field.as_str(), error = %e, "could not decode field");
                if self.config.add_error_key {
                    record.insert(ERROR_FIELD, e.to_error_object(field, &text));
                }
            }
        }
        Ok(Outcome::Continue(record))
    }
}
