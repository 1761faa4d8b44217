//! Multi-stage extraction pipeline.
//!
//! Modules mirror the stage boundaries: prompt construction, agent
//! execution, JSON recovery, normalization, confidence scoring, and the
//! orchestrator that strings them together.

mod agent;
mod confidence;
mod json_extract;
mod normalize;
mod orchestrator;
pub mod prompts;

pub use agent::{AgentOutcome, AgentRunner, Classification, ExpectedShape};
pub use confidence::{ConfidenceScorer, FieldScore, FieldType};
pub use json_extract::extract_json_object;
pub use normalize::{MaskOptions, NormalizedAmount, Normalizer};
pub use orchestrator::{Pipeline, PipelineMetadata, PipelineOutcome, PAGE_BREAK};
