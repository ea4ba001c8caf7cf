// src/route.rs

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::processor::{Pipeline, Processor};
use crate::record::{Outcome, Record};

/// Record field shippers use to name the pipeline a record belongs to.
pub const ROUTE_FIELD: &str = "fields.handler";

/// Picks a pipeline per record from the value of a routing field.
/// Records with no handler, or one nobody registered, pass through.
pub struct Router {
    field: String,
    routes: HashMap<String, Pipeline>,
}

impl Router {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            routes: HashMap::new(),
        }
    }

    pub fn route(mut self, handler: impl Into<String>, pipeline: Pipeline) -> Self {
        self.routes.insert(handler.into(), pipeline);
        self
    }

    pub fn handlers(&self) -> Vec<&str> {
        let mut handlers: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        handlers.sort_unstable();
        handlers
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(ROUTE_FIELD)
    }
}

impl Processor for Router {
    fn name(&self) -> &'static str {
        "router"
    }

    fn run(&self, record: Record) -> Result<Outcome> {
        let pipeline = record
            .get_value(&self.field)
            .and_then(Value::as_str)
            .and_then(|handler| self.routes.get(handler));

        match pipeline {
            Some(pipeline) => pipeline.run(record),
            None => {
                debug!(field = self.field.as_str(), "no pipeline for record, passing through");
                Ok(Outcome::Continue(record))
            }
        }
    }
}
