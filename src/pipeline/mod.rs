//! Per-run orchestration: chunk, generate, dedup, format, reassemble.
//!
//! One logical worker per segment. Requests are stateless, so segments can
//! run sequentially (the default) or through an ordered concurrent pool
//! sharing one HTTP connection pool. A segment whose generation fails
//! degrades to its original source text — the final document never loses
//! content, only the benefit of processing for that segment.

pub mod progress;
pub mod report;

use crossbeam_channel::Sender;
use futures_util::StreamExt;

use crate::defaults;
use crate::dedup::dedup;
use crate::generate::{GenerationRequest, Generator, SamplingParams};
use crate::prompt::PromptTemplate;
use crate::transcript::{self, Segment, format_speaker_paragraphs};

pub use progress::ProgressEvent;
pub use report::{RunReport, SegmentReport};

/// One stage definition: prompt, parameters, chunking and post-processing.
///
/// The polish and translate stages differ only in these values — the
/// supervisor/retry machinery underneath is shared.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: &'static str,
    pub template: PromptTemplate,
    pub params: SamplingParams,
    /// Segment budget in characters.
    pub max_chars: usize,
    /// `{target_length}` factor for the prompt.
    pub target_ratio: f64,
    /// Run near-duplicate removal on generated output.
    pub dedup: bool,
    /// Reflow formatted speaker tags onto their own lines.
    pub format_speakers: bool,
    /// Base name for the stage output file.
    pub output_basename: &'static str,
}

impl TaskSpec {
    /// Written-style rewrite of a raw transcript.
    pub fn polish() -> Self {
        Self {
            name: "polish",
            template: PromptTemplate::polish(),
            params: SamplingParams::polish(),
            max_chars: defaults::POLISH_MAX_CHARS,
            target_ratio: defaults::TARGET_RATIO_LOW,
            dedup: true,
            format_speakers: true,
            output_basename: defaults::POLISH_BASENAME,
        }
    }

    /// Translation of a polished transcript.
    ///
    /// No dedup and no speaker reflow: the translation stage keeps the
    /// structure its input already has.
    pub fn translate() -> Self {
        Self {
            name: "translate",
            template: PromptTemplate::translate(),
            params: SamplingParams::translate(),
            max_chars: defaults::TRANSLATE_MAX_CHARS,
            target_ratio: defaults::TARGET_RATIO_LOW,
            dedup: false,
            format_speakers: false,
            output_basename: defaults::TRANSLATE_BASENAME,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }
}

/// Run-level knobs independent of the stage.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// 1-based segment to start from; earlier segments are skipped entirely
    /// (recovery after a stuck run).
    pub start_segment: usize,
    /// Concurrent segment workers; 1 processes segments sequentially.
    pub concurrency: usize,
    /// Request streamed output from the endpoint.
    pub stream: bool,
    pub dedup_threshold: f64,
    /// Output beyond this multiple of the input is truncated; 0 disables.
    pub oversize_ratio: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            start_segment: 1,
            concurrency: defaults::CONCURRENCY,
            stream: true,
            dedup_threshold: defaults::SIMILARITY_THRESHOLD,
            oversize_ratio: defaults::OVERSIZE_RATIO,
        }
    }
}

/// Drives one stage over a whole transcript.
pub struct Pipeline {
    generator: Generator,
    task: TaskSpec,
    options: PipelineOptions,
    progress: Option<Sender<ProgressEvent>>,
}

impl Pipeline {
    pub fn new(generator: Generator, task: TaskSpec, options: PipelineOptions) -> Self {
        Self {
            generator,
            task,
            options,
            progress: None,
        }
    }

    /// Subscribes a progress channel.
    pub fn with_progress(mut self, sender: Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn task(&self) -> &TaskSpec {
        &self.task
    }

    /// Processes the transcript and returns the assembled document plus the
    /// run report. Never fails — failed segments carry their original text.
    pub async fn run(&self, transcript_text: &str) -> (String, RunReport) {
        let segments = transcript::split(transcript_text, self.task.max_chars);
        let total = segments.len();
        let input_chars = transcript_text.chars().count();

        self.emit(ProgressEvent::RunStarted {
            task: self.task.name.to_string(),
            segments: total,
            input_chars,
        });

        let skip = self.options.start_segment.saturating_sub(1);
        let jobs: Vec<(usize, Segment)> = segments
            .into_iter()
            .enumerate()
            .map(|(i, s)| (i + 1, s))
            .skip(skip)
            .collect();

        let results: Vec<(String, SegmentReport)> = futures_util::stream::iter(jobs)
            .map(|(index, segment)| self.process_segment(index, total, segment))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let document = results
            .iter()
            .map(|(text, _)| text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let report = RunReport {
            task: self.task.name.to_string(),
            segments: results.into_iter().map(|(_, report)| report).collect(),
            input_chars,
            output_chars: document.chars().count(),
        };

        self.emit(ProgressEvent::RunFinished {
            report: report.clone(),
        });

        (document, report)
    }

    async fn process_segment(
        &self,
        index: usize,
        total: usize,
        segment: Segment,
    ) -> (String, SegmentReport) {
        let input_chars = segment.char_count();
        self.emit(ProgressEvent::SegmentStarted {
            index,
            total,
            input_chars,
            target_min: (input_chars as f64 * defaults::TARGET_RATIO_LOW) as usize,
            target_max: (input_chars as f64 * defaults::TARGET_RATIO_HIGH) as usize,
        });

        let prompt = self
            .task
            .template
            .render(&segment.text, self.task.target_ratio);
        let mut request = GenerationRequest::new(prompt, self.task.params.clone());
        request.stream = self.options.stream;

        let result = self.generator.generate(&request, input_chars).await;

        let mut fell_back = false;
        let mut truncated = false;
        let mut dedup_removed = 0usize;

        let mut text = if result.is_usable() {
            result.text.trim().to_string()
        } else {
            fell_back = true;
            segment.text.clone()
        };

        if !fell_back {
            if let Some(cut) = truncate_oversize(&text, input_chars, self.options.oversize_ratio) {
                text = cut;
                truncated = true;
            }
            if self.task.dedup {
                let before = text.chars().count();
                text = dedup(&text, self.options.dedup_threshold);
                dedup_removed = before.saturating_sub(text.chars().count());
            }
            if self.task.format_speakers {
                text = format_speaker_paragraphs(&text);
            }
        }

        let report = SegmentReport {
            index,
            input_chars,
            output_chars: text.chars().count(),
            status: result.status,
            attempts: result.attempts,
            fell_back,
            dedup_removed,
            truncated,
            reason: result.reason,
        };
        self.emit(ProgressEvent::SegmentFinished {
            total,
            report: report.clone(),
        });

        (text, report)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.progress {
            // Best-effort: a dropped receiver must not stall the run.
            let _ = sender.send(event);
        }
    }
}

/// Cuts runaway output back to a sentence boundary.
///
/// Output beyond `oversize_ratio` × input is cut at 2× input characters,
/// then backed up to the last `。` past the input length when one exists.
pub fn truncate_oversize(text: &str, input_chars: usize, oversize_ratio: f64) -> Option<String> {
    if input_chars == 0 || oversize_ratio <= 0.0 {
        return None;
    }
    let output_chars = text.chars().count();
    if output_chars as f64 <= oversize_ratio * input_chars as f64 {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let limit = (input_chars * 2).min(chars.len());
    let truncated = &chars[..limit];

    let end = match truncated.iter().rposition(|&c| c == '。') {
        Some(pos) if pos + 1 > input_chars => pos + 1,
        _ => truncated.len(),
    };
    Some(truncated[..end].iter().collect())
}
