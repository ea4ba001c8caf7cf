// File: src/parsers/tablog.rs

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{message_of, ParsedLine};
use crate::config::{self, default_message_field};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::record::{Outcome, Record, TIMESTAMP_FIELD};
use crate::time::{default_layouts, Timezone, TimestampResolver};

pub const NAME: &str = "parse_filebeat_log";

const EXPECTED_LAYOUT: &str = "[datetime]\t[LEVEL]\t[hostname]\t[message]";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TablogConfig {
    pub field: String,
    pub ignore_missing: bool,
    pub ignore_malformed: bool,
    pub time_field: String,
    pub timezone: Timezone,
    pub layouts: Vec<String>,
}

impl Default for TablogConfig {
    fn default() -> Self {
        Self {
            field: default_message_field(),
            ignore_missing: false,
            ignore_malformed: true,
            time_field: TIMESTAMP_FIELD.to_string(),
            timezone: Timezone::default(),
            layouts: default_layouts(),
        }
    }
}

/// Parser for `datetime<TAB>level<TAB>host<TAB>message` lines.
#[derive(Debug, Clone)]
pub struct TablogParser {
    config: TablogConfig,
    resolver: TimestampResolver,
}

impl TablogParser {
    pub fn new(config: TablogConfig) -> Result<Self> {
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

    pub fn parse_line(&self, msg: &str) -> Option<ParsedLine> {
        let terms: Vec<&str> = msg.splitn(4, '\t').collect();
        let &[datetime, level, host, message] = terms.as_slice() else {
            return None;
        };

        let mut line = ParsedLine {
            timestamp: self.resolver.resolve(datetime, None),
            message: Some(message.to_string()),
            ..Default::default()
        };
        line.set("level", level.to_uppercase());
        line.set("host", host);
        Some(line)
    }
}

impl Processor for TablogParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        let Some(msg) = message_of(&record, &self.config.field, self.config.ignore_missing)? else {
            return Ok(Outcome::Continue(record));
        };

        match self.parse_line(&msg) {
            Some(line) => {
                line.apply(&mut record, &self.config.field, &self.config.time_field)?;
                Ok(Outcome::Continue(record))
            }
            None if self.config.ignore_malformed => {
                debug!("not a tab separated line, passing record through");
                Ok(Outcome::Continue(record))
            }
            None => Err(Error::LogFormat {
                expected: EXPECTED_LAYOUT.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn splits_into_four_terms() {
        let parser = TablogParser::from_config(&Value::Null).unwrap();
        let msg = "2023-09-27 18:55:53.798\twarn\tnode-3\tdisk usage\tabove 90%";
        let out = parser
            .run(Record::from_json(json!({ "message": msg })))
            .unwrap()
            .into_record()
            .unwrap();

        assert_eq!(
            Value::Object(out.fields),
            json!({"message": "disk usage\tabove 90%", "level": "WARN", "host": "node-3"})
        );
        let expected = Utc.with_ymd_and_hms(2023, 9, 27, 10, 55, 53).unwrap()
            + chrono::TimeDelta::milliseconds(798);
        assert_eq!(out.timestamp, Some(expected));
    }

    #[test]
    fn custom_layout_and_field() {
        let parser = TablogParser::from_config(&json!({
            "time_field": "logtime",
            "timezone": "UTC",
            "layouts": ["%d/%m/%Y %H:%M:%S"],
        }))
        .unwrap();
        let msg = "27/09/2023 10:55:53\tinfo\th\tok";
        let out = parser
            .run(Record::from_json(json!({ "message": msg })))
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(out.fields["logtime"], json!("2023-09-27T10:55:53.000Z"));
    }

    #[test]
    fn malformed_line_policy() {
        let record = Record::from_json(json!({"message": "only\tthree\tparts"}));

        let lenient = TablogParser::from_config(&Value::Null).unwrap();
        assert_eq!(lenient.run(record.clone()).unwrap(), Outcome::Continue(record.clone()));

        let strict = TablogParser::from_config(&json!({"ignore_malformed": false})).unwrap();
        match strict.run(record) {
            Err(Error::LogFormat { expected }) => assert_eq!(expected, EXPECTED_LAYOUT),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_layouts_are_rejected() {
        let err = TablogParser::from_config(&json!({"layouts": []})).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
