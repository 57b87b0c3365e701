pub mod bloom;
pub mod cognitive_load;
pub mod config;
pub mod feedback;
pub mod orchestrator;
pub mod persistence;
pub mod prompt;
pub mod retrieval;
pub mod scoring;
pub mod types;
pub mod zpd;

pub use orchestrator::PersonalizationEngine;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("content source error: {0}")]
    Source(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generation timed out after {0}ms")]
    GenerationTimeout(u64),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}
