mod config;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod parsers;
pub mod processor;
pub mod record;
pub mod registry;
pub mod route;
pub mod time;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export for easy access
pub use decode::JsonFieldDecoder;
pub use envelope::{unwrap_envelope, EnvelopeKind, EnvelopeUnwrapper};
pub use error::{Error, Result};
pub use processor::{run_guarded, Pipeline, Processor};
pub use record::{Outcome, Record};
pub use registry::{Factory, Registry};
pub use route::Router;
