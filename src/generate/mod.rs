//! Resilient streaming generation client.
//!
//! Layered bottom-up: transport adapters normalize endpoint wire formats
//! into one event model, the supervisor drives a single request to a
//! terminal state under three watchdogs, and the retry layer wraps the
//! supervisor with a bounded-attempt policy.

pub mod ollama;
pub mod openai;
pub mod params;
pub mod retry;
pub mod supervisor;
pub mod transport;

pub use ollama::OllamaTransport;
pub use openai::OpenAiTransport;
pub use params::SamplingParams;
pub use retry::{Generator, RetryPolicy, SegmentResult};
pub use supervisor::{GenerationOutcome, GenerationStatus, StreamSupervisor, WatchdogConfig};
pub use transport::{EventStream, GenerationRequest, GenerationTransport, StreamEvent};
