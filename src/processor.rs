// src/processor.rs

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::Result;
use crate::record::{Outcome, Record};

/// One stage of the normalization chain.
///
/// Implementations hold only read-only configuration, so a single instance
/// can serve many worker threads as long as each call gets its own record.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, record: Record) -> Result<Outcome>;
}

/// Ordered chain of stages. A drop or an error stops the chain.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl Processor + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn Processor>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl Processor for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn run(&self, mut record: Record) -> Result<Outcome> {
        for stage in &self.stages {
            match run_guarded(stage.as_ref(), record)? {
                Outcome::Continue(next) => record = next,
                Outcome::Drop => {
                    debug!(stage = stage.name(), "record dropped");
                    return Ok(Outcome::Drop);
                }
            }
        }
        Ok(Outcome::Continue(record))
    }
}

/// Runs one stage behind a panic boundary. A panicking stage is logged and
/// the record continues exactly as it was before the stage ran.
pub fn run_guarded(stage: &dyn Processor, record: Record) -> Result<Outcome> {
    let fallback = record.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| stage.run(record))) {
        Ok(result) => result,
        Err(payload) => {
            warn!(
                stage = stage.name(),
                reason = %panic_reason(payload.as_ref()),
                "stage panicked, passing record through unchanged"
            );
            Ok(Outcome::Continue(fallback))
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    struct Tag(&'static str);

    impl Processor for Tag {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn run(&self, mut record: Record) -> Result<Outcome> {
            record.insert(self.0, true);
            Ok(Outcome::Continue(record))
        }
    }

    struct Explode;

    impl Processor for Explode {
        fn name(&self) -> &'static str {
            "explode"
        }

        fn run(&self, record: Record) -> Result<Outcome> {
            let text = record.get_str("message")?;
            // Out-of-range slice.
            let _ = &text[..text.len() + 10];
            Ok(Outcome::Continue(record))
        }
    }

    struct Reject;

    impl Processor for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn run(&self, _record: Record) -> Result<Outcome> {
            Err(Error::Compute("nope".to_string()))
        }
    }

    struct Discard;

    impl Processor for Discard {
        fn name(&self) -> &'static str {
            "discard"
        }

        fn run(&self, _record: Record) -> Result<Outcome> {
            Ok(Outcome::Drop)
        }
    }

    fn record() -> Record {
        Record::from_json(json!({"message": "short"}))
    }

    #[test]
    fn stages_run_in_order() {
        let pipeline = Pipeline::new().with(Tag("a")).with(Tag("b"));
        let out = pipeline.run(record()).unwrap().into_record().unwrap();
        assert_eq!(out.fields["a"], json!(true));
        assert_eq!(out.fields["b"], json!(true));
        assert_eq!(pipeline.stage_names(), vec!["tag", "tag"]);
    }

    #[test]
    fn panic_passes_record_through() {
        let pipeline = Pipeline::new().with(Explode).with(Tag("after"));
        let out = pipeline.run(record()).unwrap().into_record().unwrap();
        assert_eq!(out.fields["message"], json!("short"));
        assert_eq!(out.fields["after"], json!(true));
    }

    #[test]
    fn drop_and_error_short_circuit() {
        let dropped = Pipeline::new().with(Discard).with(Tag("never"));
        assert!(dropped.run(record()).unwrap().is_drop());

        let failed = Pipeline::new().with(Reject).with(Tag("never"));
        assert!(matches!(failed.run(record()), Err(Error::Compute(_))));
    }
}
