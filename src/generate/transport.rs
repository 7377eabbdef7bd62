//! Transport abstraction over streaming generation endpoints.
//!
//! A transport turns one `GenerationRequest` into an ordered stream of
//! `StreamEvent`s. Concrete adapters (Ollama native, OpenAI-style chat)
//! normalize their wire formats into this model; the supervisor above is
//! endpoint-agnostic.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::{RedraftError, Result};
use crate::generate::params::SamplingParams;

/// One generation call: a rendered prompt plus fixed sampling parameters.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: SamplingParams,
    /// Request incremental output. Non-streamed responses are normalized
    /// into a single terminal event.
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
            stream: true,
        }
    }
}

/// An incremental unit emitted by the endpoint.
///
/// The accumulated deltas at any point are a prefix of the final output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamEvent {
    pub delta: String,
    /// Explicit completion marker from the endpoint.
    pub done: bool,
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            delta: String::new(),
            done: true,
        }
    }
}

/// Ordered stream of events for one request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A streaming generation endpoint.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Short adapter name for progress lines and reports.
    fn name(&self) -> &'static str;

    /// Issues the request and returns the normalized event stream.
    ///
    /// Connection-level failures (refused, DNS, non-2xx status) surface as
    /// errors here or as `Err` items; undecodable frames inside an otherwise
    /// healthy stream are skipped by the adapter, not surfaced.
    async fn begin(&self, request: &GenerationRequest) -> Result<EventStream>;
}

/// Validates an endpoint base URL.
pub fn validate_endpoint_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(RedraftError::InvalidEndpoint {
            url: url.to_string(),
            message: "URL must start with http:// or https://".to_string(),
        });
    }
    Ok(())
}

/// Builds the shared HTTP client for one pipeline run.
///
/// Constructed once at pipeline start and passed down explicitly — the
/// connection pool lives exactly as long as the run. Per-request deadlines
/// are enforced by the supervisor, so the client itself carries no overall
/// timeout, only a connect timeout.
pub fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| RedraftError::Transport {
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Incremental splitter for newline-delimited wire formats.
///
/// Both adapters read `bytes_stream()` chunks that do not align with line
/// boundaries; this buffers raw bytes across chunks and only decodes
/// complete lines, so a multi-byte character split between chunks stays
/// intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns all complete lines it closed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(&self.buffer[..newline_pos])
                .trim()
                .to_string();
            self.buffer.drain(..=newline_pos);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Returns the trailing partial line, if any.
    #[cfg(test)]
    pub(crate) fn remainder(&self) -> String {
        String::from_utf8_lossy(&self.buffer).trim().to_string()
    }
}

/// Maps a reqwest error to the transport error variant.
pub(crate) fn transport_error(context: &str, error: &reqwest::Error) -> RedraftError {
    let detail = if error.is_connect() {
        format!("cannot connect: {error}")
    } else if error.is_timeout() {
        format!("timed out: {error}")
    } else {
        error.to_string()
    };
    RedraftError::Transport {
        message: format!("{context}: {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_endpoint_accepts_http_and_https() {
        assert!(validate_endpoint_url("http://localhost:11434").is_ok());
        assert!(validate_endpoint_url("https://inference.internal").is_ok());
    }

    #[test]
    fn validate_endpoint_rejects_bare_host() {
        let err = validate_endpoint_url("localhost:11434").unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn line_buffer_splits_complete_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf.remainder(), "");
    }

    #[test]
    fn line_buffer_holds_partial_line_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"resp").is_empty());
        let lines = buf.push(b"onse\":\"x\"}\npartial");
        assert_eq!(lines, vec!["{\"response\":\"x\"}"]);
        assert_eq!(buf.remainder(), "partial");
    }

    #[test]
    fn line_buffer_skips_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\n\nline\n\n");
        assert_eq!(lines, vec!["line"]);
    }

    #[test]
    fn line_buffer_survives_multibyte_chars_split_across_chunks() {
        let mut buf = LineBuffer::new();
        let bytes = "{\"response\":\"你好\"}\n".as_bytes();
        // Split in the middle of 你 (3-byte sequence).
        let split = bytes.iter().position(|&b| b == b'\xe4').unwrap() + 1;
        assert!(buf.push(&bytes[..split]).is_empty());
        let lines = buf.push(&bytes[split..]);
        assert_eq!(lines, vec!["{\"response\":\"你好\"}"]);
    }

    #[test]
    fn stream_event_constructors() {
        assert_eq!(
            StreamEvent::delta("hi"),
            StreamEvent {
                delta: "hi".to_string(),
                done: false
            }
        );
        assert!(StreamEvent::done().done);
    }
}
