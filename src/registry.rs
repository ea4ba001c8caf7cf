// src/registry.rs

use std::collections::BTreeMap;

use serde_json::Value;

use crate::decode::{self, JsonFieldDecoder};
use crate::envelope::{self, EnvelopeUnwrapper};
use crate::error::{Error, Result};
use crate::parsers::{accesslog, cdc, serverlog, tablog, tracelog};
use crate::processor::{Pipeline, Processor};
use crate::route::Router;

/// Builds a processor from its config value (`null` for defaults).
pub type Factory = fn(&Value) -> Result<Box<dyn Processor>>;

const PIPELINE: &str = "pipeline";

/// Name-to-factory table the host assembles pipelines from.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    /// A registry with no processors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every processor this crate ships.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(envelope::NAME, unwrap_envelope);
        registry.register(serverlog::NAME, parse_serverlog);
        registry.register(accesslog::NAME, parse_accesslog);
        registry.register(tracelog::NAME, parse_tracelog);
        registry.register(cdc::NAME, parse_cdc);
        registry.register(tablog::NAME, parse_tablog);
        registry.register(decode::NAME, decode_json_fields);
        registry
    }

    /// Adds or replaces a factory.
    pub fn register(&mut self, name: &str, factory: Factory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn build(&self, name: &str, config: &Value) -> Result<Box<dyn Processor>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::config(name, "unknown processor"))?;
        factory(config)
    }

    /// Builds a pipeline from a list of single-key objects:
    ///
    /// ```json
    /// [{"unwrap_envelope": {"kind": "ilogtail"}}, {"parse_serverlog": null}]
    /// ```
    pub fn build_pipeline(&self, config: &Value) -> Result<Pipeline> {
        let steps = match config {
            Value::Null => return Ok(Pipeline::new()),
            Value::Array(steps) => steps,
            other => {
                return Err(Error::config(
                    PIPELINE,
                    format!("expected a list of processors, found {}", other),
                ))
            }
        };

        let mut pipeline = Pipeline::new();
        for step in steps {
            let (name, processor_config) = match step.as_object() {
                Some(map) if map.len() == 1 => map.iter().next().ok_or_else(|| {
                    Error::config(PIPELINE, "empty processor entry")
                })?,
                _ => {
                    return Err(Error::config(
                        PIPELINE,
                        format!("each entry must name exactly one processor, found {}", step),
                    ))
                }
            };
            pipeline.push(self.build(name, processor_config)?);
        }
        Ok(pipeline)
    }

    /// Builds a [`Router`] from an object mapping handler names to
    /// pipeline lists.
    pub fn build_router(&self, field: &str, config: &Value) -> Result<Router> {
        let handlers = config.as_object().ok_or_else(|| {
            Error::config("router", format!("expected handler map, found {}", config))
        })?;

        let mut router = Router::new(field);
        for (handler, steps) in handlers {
            router = router.route(handler, self.build_pipeline(steps)?);
        }
        Ok(router)
    }
}

fn boxed<P: Processor + 'static>(built: Result<P>) -> Result<Box<dyn Processor>> {
    Ok(Box::new(built?))
}

fn unwrap_envelope(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(EnvelopeUnwrapper::from_config(config))
}

fn parse_serverlog(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(serverlog::ServerlogParser::from_config(config))
}

fn parse_accesslog(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(accesslog::AccesslogParser::from_config(config))
}

fn parse_tracelog(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(tracelog::TracelogParser::from_config(config))
}

fn parse_cdc(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(cdc::CdcParser::from_config(config))
}

fn parse_tablog(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(tablog::TablogParser::from_config(config))
}

fn decode_json_fields(config: &Value) -> Result<Box<dyn Processor>> {
    boxed(JsonFieldDecoder::from_config(config))
}
