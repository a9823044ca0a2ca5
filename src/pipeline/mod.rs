//! Processor Pipeline
//!
//! An ordered, dynamically extensible chain of processors that turn one input into zero or more
//! typed results.
//!
//! # Components
//!
//! - `ProcessorPipeline`: the ordered processor list plus the `process` entry point
//! - `Processor`: a named unit of decoding logic
//! - `ProcessingContext`: per-call attributes, collected results and the consumption marker stack
//! - `AttributeMap` / `TypeKey`: typed metadata passed down to processors
//!
//! Processors that decode an outer layer hand the inner value back to the same pipeline through
//! `ProcessingContext::process_also`, so each processor only understands its own layer.

use serde::{Deserialize, Serialize};

pub use attributes::{AttributeMap, TypeKey};
pub use context::ProcessingContext;
pub use processor::{ProcessResult, Processor, ProcessorPipeline, ProcessorRegistration};

mod attributes;
mod context;
mod processor;

/// What `process` does when a processor returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the call and return the error, attributed to the failing processor.
    #[default]
    Propagate,
    /// Log the attributed error and run the remaining processors.
    LogAndContinue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Skip the remaining processors once the input was claimed.
    pub stop_when_consumed: bool,
    pub failure_policy: FailurePolicy,
}
