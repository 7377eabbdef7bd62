//! Bounded-attempt retry around the stream supervisor.
//!
//! Retry policy is a pure function over `GenerationStatus` — no exception
//! control flow. The caller always receives a `SegmentResult`, never a
//! fault, so a batch run proceeds past any single bad segment.

use crate::defaults;
use crate::generate::supervisor::{GenerationOutcome, GenerationStatus, StreamSupervisor};
use crate::generate::transport::GenerationRequest;

/// Retry thresholds for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (2 retries = 3 attempts).
    pub max_retries: u32,
    /// Output below this fraction of the input segment triggers one
    /// uncounted regeneration. Zero disables the length check (the
    /// translation stage has no meaningful length target).
    pub min_acceptable_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            min_acceptable_ratio: defaults::MIN_ACCEPTABLE_RATIO,
        }
    }
}

/// Final result for one segment after retries.
#[derive(Debug, Clone)]
pub struct SegmentResult {
    pub text: String,
    pub status: GenerationStatus,
    /// Counted attempts (the length-check regeneration is not counted).
    pub attempts: u32,
    pub reason: Option<String>,
}

impl SegmentResult {
    /// True when the text is non-empty after trimming — the pipeline falls
    /// back to the original segment otherwise.
    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Supervisor plus retry policy: the full per-segment generation driver.
pub struct Generator {
    supervisor: StreamSupervisor,
    policy: RetryPolicy,
}

impl Generator {
    pub fn new(supervisor: StreamSupervisor, policy: RetryPolicy) -> Self {
        Self { supervisor, policy }
    }

    pub fn transport_name(&self) -> &'static str {
        self.supervisor.transport_name()
    }

    /// Drives one segment to a final result.
    ///
    /// `input_chars` is the segment length used for the output-length sanity
    /// check. Attempts run strictly one after another — a new attempt starts
    /// only once the previous one reached a terminal state (the supervisor
    /// returns only after its stream is dropped).
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        input_chars: usize,
    ) -> SegmentResult {
        let max_attempts = self.policy.max_retries + 1;
        let mut last: Option<GenerationOutcome> = None;

        for attempt in 1..=max_attempts {
            let outcome = self.supervisor.run(request).await;
            let usable = !outcome.text.trim().is_empty();

            match outcome.status {
                GenerationStatus::TransportError | GenerationStatus::TimedOut => {
                    last = Some(outcome);
                }
                _ if !usable => {
                    // Empty output from an otherwise healthy stream is a
                    // transient decoding failure.
                    last = Some(outcome);
                }
                _ => {
                    return self.length_checked(outcome, request, input_chars, attempt).await;
                }
            }
        }

        // Attempts exhausted. Surface whatever text the last attempt left
        // behind, downgraded to an empty-status result with the failure
        // reason attached.
        let last = last.unwrap_or_else(|| GenerationOutcome {
            text: String::new(),
            status: GenerationStatus::Empty,
            reason: None,
        });
        let reason = match &last.reason {
            Some(r) => format!(
                "no usable output after {max_attempts} attempts (last: {}, {r})",
                last.status.label()
            ),
            None => format!(
                "no usable output after {max_attempts} attempts (last: {})",
                last.status.label()
            ),
        };
        SegmentResult {
            text: last.text,
            status: GenerationStatus::Empty,
            attempts: max_attempts,
            reason: Some(reason),
        }
    }

    /// Applies the output-length sanity check to a successful outcome.
    ///
    /// Output far shorter than the input usually means the model summarized
    /// instead of rewriting — information loss. One extra regeneration is
    /// issued, not counted against the retry budget, and its output is kept
    /// regardless of its own ratio.
    async fn length_checked(
        &self,
        outcome: GenerationOutcome,
        request: &GenerationRequest,
        input_chars: usize,
        attempts: u32,
    ) -> SegmentResult {
        let floor = self.policy.min_acceptable_ratio;
        if floor > 0.0 && input_chars > 0 {
            let output_chars = outcome.text.chars().count();
            if (output_chars as f64) < floor * input_chars as f64 {
                let regen = self.supervisor.run(request).await;
                let status = if regen.text.trim().is_empty() {
                    GenerationStatus::Empty
                } else {
                    regen.status
                };
                return SegmentResult {
                    text: regen.text,
                    status,
                    attempts,
                    reason: regen.reason.or_else(|| {
                        Some(format!(
                            "regenerated: first output below {:.0}% of input",
                            floor * 100.0
                        ))
                    }),
                };
            }
        }

        SegmentResult {
            text: outcome.text,
            status: outcome.status,
            attempts,
            reason: outcome.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SamplingParams;
    use crate::error::Result;
    use crate::generate::supervisor::WatchdogConfig;
    use crate::generate::transport::{EventStream, GenerationTransport, StreamEvent};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that answers each call with the next scripted response.
    struct SequencedTransport {
        responses: Vec<CallScript>,
        calls: AtomicUsize,
    }

    enum CallScript {
        Text(&'static str),
        OwnedText(String),
        ConnectError,
    }

    impl SequencedTransport {
        fn new(responses: Vec<CallScript>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationTransport for SequencedTransport {
        fn name(&self) -> &'static str {
            "sequenced"
        }

        async fn begin(&self, _request: &GenerationRequest) -> Result<EventStream> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .responses
                .get(index)
                .unwrap_or(self.responses.last().expect("non-empty script"));

            match script {
                CallScript::ConnectError => Err(crate::error::RedraftError::Transport {
                    message: "connection refused".to_string(),
                }),
                CallScript::Text(text) => Ok(scripted_stream(text.to_string())),
                CallScript::OwnedText(text) => Ok(scripted_stream(text.clone())),
            }
        }
    }

    fn scripted_stream(text: String) -> EventStream {
        let events = vec![Ok(StreamEvent::delta(text)), Ok(StreamEvent::done())];
        Box::pin(futures_util::stream::iter(events))
    }

    fn generator(transport: SequencedTransport, policy: RetryPolicy) -> (Generator, Arc<SequencedTransport>) {
        let transport = Arc::new(transport);
        let supervisor = StreamSupervisor::new(transport.clone(), WatchdogConfig::default());
        (Generator::new(supervisor, policy), transport)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("prompt", SamplingParams::polish())
    }

    fn no_length_check() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            min_acceptable_ratio: 0.0,
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let (generator, transport) = generator(
            SequencedTransport::new(vec![CallScript::Text("改写后的完整内容。")]),
            no_length_check(),
        );
        let result = generator.generate(&request(), 9).await;

        assert_eq!(result.status, GenerationStatus::Completed);
        assert_eq!(result.text, "改写后的完整内容。");
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_twice_then_success_returns_third_output() {
        let (generator, transport) = generator(
            SequencedTransport::new(vec![
                CallScript::Text(""),
                CallScript::Text("   "),
                CallScript::Text("第三次成功的输出。"),
            ]),
            no_length_check(),
        );
        let result = generator.generate(&request(), 9).await;

        assert_eq!(result.text, "第三次成功的输出。");
        assert_eq!(result.status, GenerationStatus::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn transport_errors_exhaust_into_empty_result() {
        let (generator, transport) = generator(
            SequencedTransport::new(vec![CallScript::ConnectError]),
            no_length_check(),
        );
        let result = generator.generate(&request(), 9).await;

        assert_eq!(result.status, GenerationStatus::Empty);
        assert!(!result.is_usable());
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.call_count(), 3);
        let reason = result.reason.unwrap();
        assert!(reason.contains("transport-error"), "{reason}");
    }

    #[tokio::test]
    async fn under_length_output_triggers_one_uncounted_regeneration() {
        // Input 100 chars, first output 30 chars (< 60%), regeneration 80.
        let first = "短".repeat(30);
        let second = "长".repeat(80);
        let (generator, transport) = generator(
            SequencedTransport::new(vec![
                CallScript::OwnedText(first),
                CallScript::OwnedText(second.clone()),
            ]),
            RetryPolicy::default(),
        );
        let result = generator.generate(&request(), 100).await;

        assert_eq!(result.text, second);
        assert_eq!(result.attempts, 1, "regeneration is not a counted attempt");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn regeneration_output_kept_even_if_still_short() {
        let first = "短".repeat(30);
        let second = "还".repeat(20);
        let (generator, transport) = generator(
            SequencedTransport::new(vec![
                CallScript::OwnedText(first),
                CallScript::OwnedText(second.clone()),
            ]),
            RetryPolicy::default(),
        );
        let result = generator.generate(&request(), 100).await;

        // Kept regardless of its own ratio — no second regeneration.
        assert_eq!(result.text, second);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn adequate_length_skips_regeneration() {
        let output = "足".repeat(70);
        let (generator, transport) = generator(
            SequencedTransport::new(vec![CallScript::OwnedText(output.clone())]),
            RetryPolicy::default(),
        );
        let result = generator.generate(&request(), 100).await;

        assert_eq!(result.text, output);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn zero_ratio_disables_length_check() {
        let (generator, transport) = generator(
            SequencedTransport::new(vec![CallScript::Text("短。")]),
            no_length_check(),
        );
        let result = generator.generate(&request(), 1000).await;

        assert_eq!(result.text, "短。");
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn usable_requires_non_whitespace_text() {
        let result = SegmentResult {
            text: "  \n ".to_string(),
            status: GenerationStatus::Completed,
            attempts: 1,
            reason: None,
        };
        assert!(!result.is_usable());
    }
}
