//! redraft - Transcript polishing and translation via local LLM endpoints
//!
//! Drives a streaming text-generation endpoint over long speaker-tagged
//! transcripts, with watchdogs against stalls, repetition loops and
//! runaway wall-clock time.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dedup;
pub mod defaults;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod transcript;

// Core generation stack (transport → supervisor → retry)
pub use generate::{
    GenerationRequest, GenerationStatus, GenerationTransport, Generator, OllamaTransport,
    OpenAiTransport, RetryPolicy, SamplingParams, SegmentResult, StreamEvent, StreamSupervisor,
    WatchdogConfig,
};

// Pipeline
pub use pipeline::{Pipeline, PipelineOptions, ProgressEvent, RunReport, SegmentReport, TaskSpec};

// Text machinery
pub use dedup::dedup;
pub use prompt::PromptTemplate;
pub use transcript::{Segment, SpeakerBlock, split};

// Error handling
pub use error::{RedraftError, Result};

// Config
pub use config::{Config, Protocol};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
