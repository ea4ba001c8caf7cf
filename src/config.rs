// src/config.rs

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Builds a processor config from the host-supplied value.
///
/// `null` stands for "all defaults". Every config struct denies unknown
/// fields, so a typo fails here instead of being silently ignored.
pub(crate) fn load<T: DeserializeOwned>(processor: &str, config: &Value) -> Result<T> {
    let value = match config {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| Error::config(processor, e))
}

pub(crate) fn default_message_field() -> String {
    "message".to_string()
}

pub(crate) fn default_path_field() -> String {
    "log.file.path".to_string()
}
