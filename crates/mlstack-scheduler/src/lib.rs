//! Pipeline definition and execution for mlstack.
//!
//! Pipelines are built from explicitly registered steps, validated as a
//! DAG before any run starts, and executed one step at a time in
//! dependency order against the active stack.

pub mod orchestrator;
pub mod pipeline;

pub use orchestrator::{PipelineEvent, PipelineOrchestrator, PipelineResult, StepState};
pub use pipeline::{Pipeline, PipelineBuilder, StepSpec};
