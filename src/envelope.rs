// src/envelope.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::{self, default_message_field};
use crate::error::Result;
use crate::parsers::message_of;
use crate::processor::Processor;
use crate::record::{Outcome, Record};

pub const NAME: &str = "unwrap_envelope";

/// Field upstream shippers leave behind that later stages must not see.
const SCRATCH_FIELD: &str = "input";

/// Outer JSON wrapper added by a log shipping agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Ilogtail,
    Filebeat,
}

impl EnvelopeKind {
    /// Unknown names map to `None`, which makes unwrapping a no-op.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ilogtail" => Some(EnvelopeKind::Ilogtail),
            "filebeat" => Some(EnvelopeKind::Filebeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Ilogtail => "ilogtail",
            EnvelopeKind::Filebeat => "filebeat",
        }
    }
}

#[derive(Debug, Deserialize)]
struct IlogtailEnvelope {
    contents: IlogtailContents,
    #[serde(default)]
    tags: Option<IlogtailTags>,
}

#[derive(Debug, Deserialize)]
struct IlogtailContents {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct IlogtailTags {
    #[serde(rename = "k8s.namespace.name", default)]
    namespace: Option<String>,
    #[serde(rename = "k8s.node.ip", default)]
    node_ip: Option<String>,
    #[serde(rename = "container.ip", default)]
    container_ip: Option<String>,
    #[serde(rename = "log.file.path", default)]
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilebeatEnvelope {
    message: String,
    #[serde(default)]
    log: Option<FilebeatLog>,
}

#[derive(Debug, Deserialize)]
struct FilebeatLog {
    #[serde(default)]
    file: Option<FilebeatFile>,
}

#[derive(Debug, Deserialize)]
struct FilebeatFile {
    #[serde(default)]
    path: Option<String>,
}

/// Replaces `field` with the envelope's inner content and lifts the tag
/// fields to the top level. Fails with `Decode` on malformed envelope JSON,
/// in which case the record is left as it was.
pub fn unwrap_envelope(record: &mut Record, field: &str, kind: Option<EnvelopeKind>) -> Result<()> {
    let Some(kind) = kind else {
        return Ok(());
    };

    let text = record.get_str(field)?;
    match kind {
        EnvelopeKind::Ilogtail => {
            let envelope: IlogtailEnvelope = serde_json::from_str(text)?;
            // Null tags read as empty, like absent ones.
            let tags = envelope.tags.unwrap_or_default();

            record.insert("namespace", tags.namespace.unwrap_or_default());
            record.insert("nodeip", tags.node_ip.unwrap_or_default());
            record.insert("podip", tags.container_ip.unwrap_or_default());
            if let Some(path) = tags.file_path {
                put_path_field(record, path);
            }
            record.insert(field, envelope.contents.content);
        }
        EnvelopeKind::Filebeat => {
            let envelope: FilebeatEnvelope = serde_json::from_str(text)?;
            let path = envelope.log.and_then(|l| l.file).and_then(|f| f.path);

            if let Some(path) = path {
                put_path_field(record, path);
            }
            record.insert(field, envelope.message);
        }
    }

    record.fields.remove(SCRATCH_FIELD);
    Ok(())
}

fn put_path_field(record: &mut Record, path: String) {
    // A scalar already sitting at `log` is left alone.
    if let Err(e) = record.put_value(&config::default_path_field(), path) {
        debug!(error = %e, "could not set source file path");
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EnvelopeConfig {
    /// Field holding the envelope JSON text.
    pub field: String,
    /// Envelope kind used when `kind_field` is unset or absent on the record.
    pub kind: Option<String>,
    /// Record field naming the envelope kind per record, e.g. `fields.collector`.
    pub kind_field: Option<String>,
    pub ignore_missing: bool,
    /// Pass records with undecodable envelopes through instead of failing them.
    pub ignore_malformed: bool,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            field: default_message_field(),
            kind: None,
            kind_field: None,
            ignore_missing: false,
            ignore_malformed: false,
        }
    }
}

/// Stage wrapper around [`unwrap_envelope`].
#[derive(Debug, Clone)]
pub struct EnvelopeUnwrapper {
    config: EnvelopeConfig,
}

impl EnvelopeUnwrapper {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Value) -> Result<Self> {
        Ok(Self::new(config::load(NAME, config)?))
    }

    fn kind_for(&self, record: &Record) -> Option<EnvelopeKind> {
        let from_record = self
            .config
            .kind_field
            .as_deref()
            .and_then(|field| record.get_value(field))
            .and_then(Value::as_str);

        from_record
            .or(self.config.kind.as_deref())
            .and_then(EnvelopeKind::parse)
    }
}

impl Processor for EnvelopeUnwrapper {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        let Some(kind) = self.kind_for(&record) else {
            return Ok(Outcome::Continue(record));
        };
        if message_of(&record, &self.config.field, self.config.ignore_missing)?.is_none() {
            return Ok(Outcome::Continue(record));
        }

        match unwrap_envelope(&mut record, &self.config.field, Some(kind)) {
            Ok(()) => Ok(Outcome::Continue(record)),
            Err(e) if self.config.ignore_malformed => {
                debug!(kind = kind.as_str(), error = %e, "malformed envelope, passing record through");
                Ok(Outcome::Continue(record))
            }
            Err(e) => Err(e),
        }
    }
}
