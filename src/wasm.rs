use serde_json::Value;
use wasm_bindgen::prelude::*;

use crate::{Outcome, Processor, Record, Registry};

// Serialized back to the JavaScript side as a JSON string.
#[derive(serde::Serialize)]
struct WasmResult {
    outcome: &'static str,
    record: Option<Record>,
    error: Option<String>,
}

impl WasmResult {
    fn failed(error: String) -> Self {
        Self {
            outcome: "error",
            record: None,
            error: Some(error),
        }
    }
}

fn normalize_json(pipeline: &str, record: &str) -> WasmResult {
    let config: Value = match serde_json::from_str(pipeline) {
        Ok(config) => config,
        Err(e) => return WasmResult::failed(format!("Pipeline Error: {}", e)),
    };
    let pipeline = match Registry::builtin().build_pipeline(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => return WasmResult::failed(format!("Pipeline Error: {}", e)),
    };
    let record = match serde_json::from_str::<Value>(record) {
        Ok(Value::Object(fields)) => Record::from(fields),
        Ok(_) => return WasmResult::failed("Record Error: expected a JSON object".to_string()),
        Err(e) => return WasmResult::failed(format!("Record Error: {}", e)),
    };

    match pipeline.run(record) {
        Ok(Outcome::Continue(record)) => WasmResult {
            outcome: "continue",
            record: Some(record),
            error: None,
        },
        Ok(Outcome::Drop) => WasmResult {
            outcome: "drop",
            record: None,
            error: None,
        },
        Err(e) => WasmResult::failed(e.to_string()),
    }
}

/// Runs one record (a JSON object of fields) through a pipeline given in
/// the same list form [`Registry::build_pipeline`] accepts.
#[wasm_bindgen]
pub fn normalize(pipeline: &str, record: &str) -> String {
    serde_json::to_string(&normalize_json(pipeline, record)).unwrap_or_default()
}
