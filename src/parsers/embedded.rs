// src/parsers/embedded.rs

use serde_json::{Map, Value};

/// Finds the payload between the marker that starts at `begin` and the last
/// marker in `msg`. `None` when there is no second marker or the two are adjacent.
pub fn embedded_region<'a>(msg: &'a str, begin: usize, marker: &str) -> Option<&'a str> {
    let start = begin.checked_add(marker.len())?;
    let end = msg.rfind(marker)?;
    if end <= start {
        return None;
    }
    msg.get(start..end)
}

/// Decodes an embedded payload as a JSON object, ready to be merged key by key.
pub fn decode_embedded(payload: &str) -> Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_str(payload)
}
