//! OpenAI-style chat-completion transport.
//!
//! Covers llama-server and other local endpoints exposing
//! `POST {base}/v1/chat/completions`. Streamed responses arrive as SSE
//! `data: {...}` lines with `choices[0].delta.content`; `data: [DONE]` (or a
//! `finish_reason`) marks completion. Non-streamed responses are a single
//! JSON object with `choices[0].message.content`. Both are normalized into
//! the same event model as the Ollama transport.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::error::{RedraftError, Result};
use crate::generate::transport::{
    EventStream, GenerationRequest, GenerationTransport, LineBuffer, StreamEvent, transport_error,
    validate_endpoint_url,
};

/// Transport for OpenAI-compatible chat endpoints.
pub struct OpenAiTransport {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiTransport {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Result<Self> {
        validate_endpoint_url(base_url)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn payload(&self, request: &GenerationRequest) -> serde_json::Value {
        let params = &request.params;
        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": params.temperature,
            "top_p": params.top_p,
            "top_k": params.top_k,
            "repeat_penalty": params.repeat_penalty,
            "presence_penalty": params.presence_penalty,
            "frequency_penalty": params.frequency_penalty,
            "max_tokens": params.max_output_tokens,
            "stop": params.stop,
            "stream": request.stream,
        })
    }

    /// Parses one SSE line. Returns `None` for frames to skip (comments,
    /// empty keep-alives, undecodable payloads).
    fn parse_line(line: &str) -> Option<Result<StreamEvent>> {
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            return Some(Ok(StreamEvent::done()));
        }

        let chunk: ChatChunk = serde_json::from_str(data).ok()?;
        let choice = chunk.choices.into_iter().next()?;
        let delta = choice
            .delta
            .and_then(|d| d.content)
            .unwrap_or_default();
        Some(Ok(StreamEvent {
            delta,
            done: choice.finish_reason.is_some(),
        }))
    }
}

#[async_trait]
impl GenerationTransport for OpenAiTransport {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn begin(&self, request: &GenerationRequest) -> Result<EventStream> {
        let url = format!("{}/v1/chat/completions", self.base_url);
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
            let chunk: ChatChunk = response
                .json()
                .await
                .map_err(|e| transport_error("response decode failed", &e))?;
            let text = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message)
                .map(|m| m.content)
                .unwrap_or_default();
            let events = vec![Ok(StreamEvent { delta: text, done: true })];
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_extracts_streamed_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let event = OpenAiTransport::parse_line(line).unwrap().unwrap();
        assert_eq!(event.delta, "Hello");
        assert!(!event.done);
    }

    #[test]
    fn parse_line_done_marker() {
        let event = OpenAiTransport::parse_line("data: [DONE]").unwrap().unwrap();
        assert!(event.done);
        assert!(event.delta.is_empty());
    }

    #[test]
    fn parse_line_finish_reason_counts_as_done() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let event = OpenAiTransport::parse_line(line).unwrap().unwrap();
        assert!(event.done);
    }

    #[test]
    fn parse_line_skips_non_data_and_malformed_lines() {
        assert!(OpenAiTransport::parse_line(": keep-alive comment").is_none());
        assert!(OpenAiTransport::parse_line("event: ping").is_none());
        assert!(OpenAiTransport::parse_line("data: {\"trunc").is_none());
    }

    #[test]
    fn payload_maps_params_to_openai_names() {
        let transport = OpenAiTransport::new(
            reqwest::Client::new(),
            "http://localhost:6008",
            "qwen3-30b-a3b",
        )
        .unwrap();
        let request = GenerationRequest::new("翻译这段", crate::SamplingParams::translate());
        let payload = transport.payload(&request);

        assert_eq!(payload["model"], "qwen3-30b-a3b");
        assert_eq!(payload["max_tokens"], 4096);
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "翻译这段");
    }
}
