//! Streaming call supervision with inline watchdogs.
//!
//! One request moves through `Idle → Connecting → Streaming` and ends in an
//! absorbing terminal state: `Completed`, `Stalled`, `RepetitionStopped`,
//! `TimedOut` or `TransportError`. Three watchdogs guard the streaming
//! phase, checked inline on the read loop (no separate polling threads, so
//! cancellation cannot race an in-flight read):
//!
//! - idle: every delta resets the timer; `max_idle_strikes` consecutive
//!   `idle_interval`s without output → `Stalled`;
//! - repetition: when output has grown by `repetition_check_interval` chars
//!   since the last check, the trailing window is searched for in the
//!   preceding text → `RepetitionStopped`;
//! - hard timeout: a wall-clock ceiling over the whole request, connection
//!   included → `TimedOut`.
//!
//! Accumulation is append-only and the partial text is returned with every
//! terminal status — the caller decides whether partial output is usable.
//! Returning drops the event stream, which closes the underlying connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{Instant, timeout_at};

use crate::defaults;
use crate::generate::transport::{GenerationRequest, GenerationTransport};

/// Terminal status of one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationStatus {
    /// Endpoint signalled completion (or closed the stream cleanly).
    Completed,
    /// Idle watchdog fired: the stream went quiet while still open.
    Stalled,
    /// Repetition watchdog fired: trailing output repeats earlier output.
    RepetitionStopped,
    /// Hard wall-clock ceiling reached.
    TimedOut,
    /// No usable text after all attempts (assigned by the retry layer).
    Empty,
    /// Connection-level failure (refused, DNS, non-2xx, broken stream).
    TransportError,
}

impl GenerationStatus {
    /// Short lowercase label for progress lines and the run summary.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stalled => "stalled",
            Self::RepetitionStopped => "repetition-stopped",
            Self::TimedOut => "timed-out",
            Self::Empty => "empty",
            Self::TransportError => "transport-error",
        }
    }

    /// Statuses whose partial output is accepted as a usable result.
    pub fn is_acceptable(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stalled | Self::RepetitionStopped
        )
    }
}

/// Watchdog thresholds for one supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogConfig {
    pub idle_interval: Duration,
    pub max_idle_strikes: u32,
    pub hard_timeout: Duration,
    /// Trailing window, in chars, tested for verbatim repetition.
    pub repetition_window: usize,
    /// Re-check cadence, in chars of freshly accumulated output.
    pub repetition_check_interval: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            idle_interval: defaults::IDLE_INTERVAL,
            max_idle_strikes: defaults::MAX_IDLE_STRIKES,
            hard_timeout: defaults::HARD_TIMEOUT,
            repetition_window: defaults::REPETITION_WINDOW,
            repetition_check_interval: defaults::REPETITION_CHECK_INTERVAL,
        }
    }
}

/// Result of one supervised call: accumulated text plus terminal status.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    pub status: GenerationStatus,
    pub reason: Option<String>,
}

impl GenerationOutcome {
    fn new(text: String, status: GenerationStatus, reason: Option<String>) -> Self {
        Self {
            text,
            status,
            reason,
        }
    }
}

/// Drives one generation request to a terminal state.
pub struct StreamSupervisor {
    transport: Arc<dyn GenerationTransport>,
    config: WatchdogConfig,
}

impl StreamSupervisor {
    pub fn new(transport: Arc<dyn GenerationTransport>, config: WatchdogConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Issues the request and consumes the stream until a terminal state.
    pub async fn run(&self, request: &GenerationRequest) -> GenerationOutcome {
        let deadline = Instant::now() + self.config.hard_timeout;

        // Connecting: the hard ceiling covers connection establishment too.
        let mut stream = match timeout_at(deadline, self.transport.begin(request)).await {
            Err(_) => {
                return GenerationOutcome::new(
                    String::new(),
                    GenerationStatus::TimedOut,
                    Some(format!(
                        "connection not established within {}s",
                        self.config.hard_timeout.as_secs()
                    )),
                );
            }
            Ok(Err(e)) => {
                return GenerationOutcome::new(
                    String::new(),
                    GenerationStatus::TransportError,
                    Some(e.to_string()),
                );
            }
            Ok(Ok(stream)) => stream,
        };

        // Streaming: one read loop, watchdogs checked inline.
        let mut accumulated = String::new();
        let mut accumulated_chars = 0usize;
        let mut strikes = 0u32;
        let mut last_repetition_check = 0usize;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.timed_out(accumulated);
            }
            let idle_deadline = (now + self.config.idle_interval).min(deadline);

            match timeout_at(idle_deadline, stream.next()).await {
                Err(_) => {
                    // No delta within the idle interval (or the hard
                    // deadline cut the interval short).
                    if Instant::now() >= deadline {
                        return self.timed_out(accumulated);
                    }
                    strikes += 1;
                    if strikes >= self.config.max_idle_strikes {
                        return GenerationOutcome::new(
                            accumulated,
                            GenerationStatus::Stalled,
                            Some(format!(
                                "no output for {} consecutive {}s intervals",
                                strikes,
                                self.config.idle_interval.as_secs()
                            )),
                        );
                    }
                }
                Ok(None) => {
                    // Stream closed without an explicit done marker; the
                    // accumulated prefix is the final output.
                    return GenerationOutcome::new(
                        accumulated,
                        GenerationStatus::Completed,
                        None,
                    );
                }
                Ok(Some(Err(e))) => {
                    return GenerationOutcome::new(
                        accumulated,
                        GenerationStatus::TransportError,
                        Some(e.to_string()),
                    );
                }
                Ok(Some(Ok(event))) => {
                    strikes = 0;
                    if !event.delta.is_empty() {
                        accumulated_chars += event.delta.chars().count();
                        accumulated.push_str(&event.delta);
                    }
                    if event.done {
                        return GenerationOutcome::new(
                            accumulated,
                            GenerationStatus::Completed,
                            None,
                        );
                    }
                    if accumulated_chars - last_repetition_check
                        >= self.config.repetition_check_interval
                    {
                        if detect_repetition(
                            &accumulated,
                            self.config.repetition_window,
                            defaults::REPETITION_SEARCH_RANGE,
                        ) {
                            return GenerationOutcome::new(
                                accumulated,
                                GenerationStatus::RepetitionStopped,
                                Some(format!(
                                    "trailing {} chars repeat earlier output",
                                    self.config.repetition_window
                                )),
                            );
                        }
                        last_repetition_check = accumulated_chars;
                    }
                }
            }
        }
    }

    fn timed_out(&self, accumulated: String) -> GenerationOutcome {
        GenerationOutcome::new(
            accumulated,
            GenerationStatus::TimedOut,
            Some(format!(
                "hard timeout after {}s",
                self.config.hard_timeout.as_secs()
            )),
        )
    }
}

/// Tests whether the trailing `window` characters of `text` occur verbatim
/// within the preceding `search_range` characters.
///
/// Generation loops manifest as short verbatim repeats long before they
/// consume the whole output budget; catching the repeat early bounds wasted
/// compute and wall-clock time.
pub fn detect_repetition(text: &str, window: usize, search_range: usize) -> bool {
    let chars: Vec<char> = text.chars().collect();
    if window == 0 || chars.len() < window * 2 {
        return false;
    }

    let tail: String = chars[chars.len() - window..].iter().collect();
    let preceding: String = if chars.len() > search_range {
        chars[chars.len() - search_range..chars.len() - window]
            .iter()
            .collect()
    } else {
        chars[..chars.len() - window].iter().collect()
    };

    preceding.contains(&tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RedraftError, Result};
    use crate::generate::transport::{EventStream, StreamEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport yielding a scripted sequence of (delay, item) pairs.
    struct ScriptedTransport {
        script: Vec<(Duration, Result<StreamEvent>)>,
        pulled: Arc<AtomicUsize>,
        /// End with a forever-pending stream instead of closing.
        hang_after_script: bool,
    }

    impl ScriptedTransport {
        fn new(script: Vec<(Duration, Result<StreamEvent>)>) -> Self {
            Self {
                script,
                pulled: Arc::new(AtomicUsize::new(0)),
                hang_after_script: false,
            }
        }

        fn hanging(mut self) -> Self {
            self.hang_after_script = true;
            self
        }

        fn pulled_counter(&self) -> Arc<AtomicUsize> {
            self.pulled.clone()
        }
    }

    #[async_trait]
    impl GenerationTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn begin(&self, _request: &GenerationRequest) -> Result<EventStream> {
            let script: Vec<_> = self
                .script
                .iter()
                .map(|(d, item)| {
                    let item = match item {
                        Ok(ev) => Ok(ev.clone()),
                        Err(e) => Err(RedraftError::Transport {
                            message: e.to_string(),
                        }),
                    };
                    (*d, item)
                })
                .collect();
            let pulled = self.pulled.clone();
            let hang = self.hang_after_script;

            let stream = futures_util::stream::unfold(
                (script.into_iter(), pulled, hang),
                |(mut iter, pulled, hang)| async move {
                    match iter.next() {
                        Some((delay, item)) => {
                            tokio::time::sleep(delay).await;
                            pulled.fetch_add(1, Ordering::SeqCst);
                            Some((item, (iter, pulled, hang)))
                        }
                        None if hang => {
                            futures_util::future::pending::<()>().await;
                            None
                        }
                        None => None,
                    }
                },
            );
            Ok(Box::pin(stream))
        }
    }

    /// Transport that fails at connection time.
    struct RefusingTransport;

    #[async_trait]
    impl GenerationTransport for RefusingTransport {
        fn name(&self) -> &'static str {
            "refusing"
        }

        async fn begin(&self, _request: &GenerationRequest) -> Result<EventStream> {
            Err(RedraftError::Transport {
                message: "connection refused".to_string(),
            })
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("prompt", crate::SamplingParams::polish())
    }

    fn supervisor(transport: impl GenerationTransport + 'static) -> StreamSupervisor {
        StreamSupervisor::new(Arc::new(transport), WatchdogConfig::default())
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test(start_paused = true)]
    async fn completed_on_done_flag() {
        let transport = ScriptedTransport::new(vec![
            (ms(10), Ok(StreamEvent::delta("你好"))),
            (ms(10), Ok(StreamEvent::delta("世界"))),
            (ms(10), Ok(StreamEvent::done())),
        ]);
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::Completed);
        assert_eq!(outcome.text, "你好世界");
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_without_done_counts_as_completed() {
        let transport = ScriptedTransport::new(vec![(ms(10), Ok(StreamEvent::delta("部分")))]);
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::Completed);
        assert_eq!(outcome.text, "部分");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_after_consecutive_idle_strikes() {
        // One delta, then silence: three 30s intervals pass → Stalled, and
        // the partial output is still retrievable.
        let transport =
            ScriptedTransport::new(vec![(ms(10), Ok(StreamEvent::delta("开头")))]).hanging();
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::Stalled);
        assert_eq!(outcome.text, "开头");
        assert!(outcome.reason.unwrap().contains("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_but_progressing_stream_is_not_stalled() {
        // Deltas every 25s never exhaust the 3-strike budget, but the hard
        // 180s ceiling still fires: slow progress is tolerated, runaway
        // wall-clock is not.
        let script: Vec<_> = (0..20)
            .map(|_| (Duration::from_secs(25), Ok(StreamEvent::delta("慢"))))
            .collect();
        let transport = ScriptedTransport::new(script);
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::TimedOut);
        assert_eq!(outcome.text, "慢".repeat(7));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_transport_error() {
        let outcome = supervisor(RefusingTransport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::TransportError);
        assert!(outcome.text.is_empty());
        assert!(outcome.reason.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_error_keeps_partial_output() {
        let transport = ScriptedTransport::new(vec![
            (ms(10), Ok(StreamEvent::delta("保留"))),
            (
                ms(10),
                Err(RedraftError::Transport {
                    message: "reset by peer".to_string(),
                }),
            ),
        ]);
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::TransportError);
        assert_eq!(outcome.text, "保留");
    }

    /// 500 distinct chars followed by a 100-char tail copied from within the
    /// preceding text — the exact shape of a decode loop.
    fn repetitive_text() -> String {
        let base: Vec<char> = (0..500u32)
            .map(|i| char::from_u32(0x4E00 + i).unwrap())
            .collect();
        let tail: String = base[300..400].iter().collect();
        let mut text: String = base.iter().collect();
        text.push_str(&tail);
        text
    }

    #[tokio::test(start_paused = true)]
    async fn repetition_stops_stream_within_one_check_interval() {
        let transport = ScriptedTransport::new(vec![
            (ms(10), Ok(StreamEvent::delta(repetitive_text()))),
            (ms(10), Ok(StreamEvent::delta("不应该被消费"))),
            (ms(10), Ok(StreamEvent::done())),
        ]);
        let pulled = transport.pulled_counter();
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::RepetitionStopped);
        // The stream stopped being consumed after the triggering delta.
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
        assert!(!outcome.text.contains("不应该被消费"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_repetitive_output_runs_to_completion() {
        // Longer than one check interval, but with no verbatim repeat.
        let text: String = (0..700u32)
            .map(|i| char::from_u32(0x4E00 + i).unwrap())
            .collect();
        let transport = ScriptedTransport::new(vec![
            (ms(10), Ok(StreamEvent::delta(text.clone()))),
            (ms(10), Ok(StreamEvent::done())),
        ]);
        let outcome = supervisor(transport).run(&request()).await;

        assert_eq!(outcome.status, GenerationStatus::Completed);
        assert_eq!(outcome.text, text);
    }

    #[test]
    fn detect_repetition_needs_twice_the_window() {
        assert!(!detect_repetition("短文本", 100, 500));
        assert!(!detect_repetition(&"字".repeat(150), 100, 500));
    }

    #[test]
    fn detect_repetition_finds_verbatim_tail() {
        // "abcdefgh" + tail "efgh" repeated: last 4 chars occur earlier.
        let text = "甲乙丙丁戊己庚辛戊己庚辛";
        assert!(detect_repetition(text, 4, 500));
    }

    #[test]
    fn detect_repetition_distinct_text_is_clean() {
        let text: String = (0..300u32)
            .map(|i| char::from_u32(0x4E00 + i).unwrap())
            .collect();
        assert!(!detect_repetition(&text, 100, 500));
    }

    #[test]
    fn detect_repetition_limits_search_to_range() {
        // The tail's only earlier occurrence is outside the search range.
        let repeated: String = (0..100u32)
            .map(|i| char::from_u32(0x4E00 + i).unwrap())
            .collect();
        let filler: String = (0..600u32)
            .map(|i| char::from_u32(0x6E00 + i).unwrap())
            .collect();
        let text = format!("{repeated}{filler}{repeated}");
        assert!(!detect_repetition(&text, 100, 500));

        // With a window large enough to reach it, the repeat is found.
        let near = format!("{repeated}{}{repeated}", &filler[..300 * 3]);
        assert!(detect_repetition(&near, 100, 500));
    }

    #[test]
    fn status_labels_are_stable() {
        assert_eq!(GenerationStatus::Completed.label(), "completed");
        assert_eq!(GenerationStatus::RepetitionStopped.label(), "repetition-stopped");
        assert_eq!(GenerationStatus::TransportError.label(), "transport-error");
    }

    #[test]
    fn acceptable_statuses() {
        assert!(GenerationStatus::Completed.is_acceptable());
        assert!(GenerationStatus::Stalled.is_acceptable());
        assert!(GenerationStatus::RepetitionStopped.is_acceptable());
        assert!(!GenerationStatus::TimedOut.is_acceptable());
        assert!(!GenerationStatus::TransportError.is_acceptable());
        assert!(!GenerationStatus::Empty.is_acceptable());
    }
}
