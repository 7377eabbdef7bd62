//! Ollama native generation transport.
//!
//! `POST {base}/api/generate` with `"stream": true` returns newline-delimited
//! JSON objects of the form `{"response": "...", "done": false}`. Undecodable
//! lines are skipped — a corrupted frame must not abort an otherwise healthy
//! stream.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::error::{RedraftError, Result};
use crate::generate::transport::{
    EventStream, GenerationRequest, GenerationTransport, LineBuffer, StreamEvent, transport_error,
    validate_endpoint_url,
};

/// Transport for the Ollama `/api/generate` protocol.
pub struct OllamaTransport {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaTransport {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Result<Self> {
        validate_endpoint_url(base_url)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn payload(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": request.stream,
            "options": request.params.to_ollama_options(),
        })
    }

    /// Parses one NDJSON line. Returns `None` for frames to skip.
    fn parse_line(line: &str) -> Option<Result<StreamEvent>> {
        let frame: GenerateFrame = serde_json::from_str(line).ok()?;
        if let Some(error) = frame.error {
            return Some(Err(RedraftError::Transport {
                message: format!("endpoint error: {error}"),
            }));
        }
        Some(Ok(StreamEvent {
            delta: frame.response,
            done: frame.done,
        }))
    }
}

#[async_trait]
impl GenerationTransport for OllamaTransport {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn begin(&self, request: &GenerationRequest) -> Result<EventStream> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|e| transport_error("request failed", &e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RedraftError::EndpointStatus { status, body });
        }

        if !request.stream {
            // Non-streamed: a single JSON object with the full text.
            let frame: GenerateFrame = response
                .json()
                .await
                .map_err(|e| transport_error("response decode failed", &e))?;
            if let Some(error) = frame.error {
                return Err(RedraftError::Transport {
                    message: format!("endpoint error: {error}"),
                });
            }
            let events = vec![Ok(StreamEvent {
                delta: frame.response,
                done: true,
            })];
            return Ok(Box::pin(futures_util::stream::iter(events)));
        }

        let mut buffer = LineBuffer::new();
        let events = response.bytes_stream().flat_map(move |chunk| {
            let items: Vec<Result<StreamEvent>> = match chunk {
                Ok(bytes) => buffer
                    .push(&bytes)
                    .iter()
                    .filter_map(|line| Self::parse_line(line))
                    .collect(),
                Err(e) => vec![Err(transport_error("stream read failed", &e))],
            };
            futures_util::stream::iter(items)
        });

        Ok(Box::pin(events))
    }
}
