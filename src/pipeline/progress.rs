//! Progress events for pipeline runs.
//!
//! The pipeline reports through an explicit channel the caller subscribes
//! to; rendering lives with the subscriber, not in the generation control
//! flow. Events are sent best-effort — a dropped receiver never stalls a
//! run.

use crate::pipeline::report::{RunReport, SegmentReport};

/// Events emitted over the course of one run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStarted {
        task: String,
        segments: usize,
        input_chars: usize,
    },
    SegmentStarted {
        index: usize,
        total: usize,
        input_chars: usize,
        /// Target output band for the stage, in characters.
        target_min: usize,
        target_max: usize,
    },
    SegmentFinished {
        total: usize,
        report: SegmentReport,
    },
    RunFinished {
        report: RunReport,
    },
}
