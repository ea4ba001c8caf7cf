// src/record.rs

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decode::expand::{self, ExpandConflictError};
use crate::error::{Error, Result};

/// Field name that addresses the record's own timestamp instead of a content field.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Metadata key holding the downstream document identifier.
pub const ID_KEY: &str = "_id";

/// One in-flight log record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// What a stage decided to do with the record it was handed.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Hand the (possibly mutated) record to the next stage.
    Continue(Record),
    /// Stop here. Not an error, nothing is emitted.
    Drop,
}

impl Outcome {
    pub fn into_record(self) -> Option<Record> {
        match self {
            Outcome::Continue(record) => Some(record),
            Outcome::Drop => None,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Outcome::Drop)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }
}

impl Record {
    /// Builds a record from a JSON object; any other value yields an empty record.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::from(fields),
            _ => Self::default(),
        }
    }

    pub fn get_value(&self, path: &str) -> Option<&Value> {
        expand::get_path(&self.fields, path)
    }

    pub fn put_value(
        &mut self,
        path: &str,
        value: impl Into<Value>,
    ) -> std::result::Result<Option<Value>, ExpandConflictError> {
        expand::put_path(&mut self.fields, path, value.into())
    }

    /// Removes a field path, pruning parent objects left empty.
    pub fn delete_value(&mut self, path: &str) -> Option<Value> {
        let removed = expand::delete_path(&mut self.fields, path)?;

        let mut parent = path;
        while let Some((prefix, _)) = parent.rsplit_once('.') {
            let empty = matches!(self.get_value(prefix), Some(Value::Object(map)) if map.is_empty());
            if !empty {
                break;
            }
            expand::delete_path(&mut self.fields, prefix);
            parent = prefix;
        }
        Some(removed)
    }

    /// Sets a top-level field, no path expansion.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Checked string extraction for a field path.
    pub fn get_str(&self, path: &str) -> Result<&str> {
        let value = self.get_value(path).ok_or_else(|| Error::missing(path))?;
        value.as_str().ok_or_else(|| Error::FieldType {
            field: path.to_string(),
            expected: "string",
            actual: kind_of(value),
        })
    }

    /// Stores a resolved instant under `field`. `@timestamp` targets the
    /// record timestamp, anything else gets an RFC 3339 string.
    pub fn set_time(&mut self, field: &str, ts: DateTime<Utc>) -> Result<()> {
        if field == TIMESTAMP_FIELD {
            self.timestamp = Some(ts);
            return Ok(());
        }
        self.put_value(field, ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .map_err(|e| Error::Compute(e.to_string()))?;
        Ok(())
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.metadata
            .insert(ID_KEY.to_string(), Value::String(id.into()));
    }

    pub fn id(&self) -> Option<&str> {
        self.metadata.get(ID_KEY).and_then(Value::as_str)
    }
}

/// Short type name of a JSON value, used in error messages.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
