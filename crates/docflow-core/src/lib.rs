//! # docflow-core
//!
//! Core types, traits, and contracts for the docflow ingestion engine.
//!
//! This crate holds the job contract registry, the typed job payloads, the
//! per-document completion vector and the storage/execution traits that the
//! other docflow crates implement or consume.

pub mod completion;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod payloads;
pub mod registry;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use completion::{CompletionVector, RecordOutcome};
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, PipelineEvent};
pub use models::*;
pub use payloads::{JobInput, JobOutput};
pub use registry::{
    expected_jobs, input_schema, is_tracked, output_schema, validate_input, validate_output,
    PayloadSchema,
};
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
