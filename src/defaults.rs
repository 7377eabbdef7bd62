//! Default configuration constants for redraft.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Default generation endpoint base URL.
///
/// Points at a local Ollama server. The OpenAI-style protocol adapter
/// appends its own path, so the base is protocol-neutral.
pub const ENDPOINT_URL: &str = "http://localhost:11434";

/// Default model tag requested from the endpoint.
pub const MODEL: &str = "yasserrmd/Qwen2.5-7B-Instruct-1M:latest";

/// Interval without any incremental output that counts as one idle strike.
///
/// 30 seconds tolerates slow-but-progressing generation on CPU-bound
/// endpoints; a single hard timeout at this scale would kill healthy runs.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive idle strikes before a stream is declared stalled.
pub const MAX_IDLE_STRIKES: u32 = 3;

/// Wall-clock ceiling for one generation request, connection included.
pub const HARD_TIMEOUT: Duration = Duration::from_secs(180);

/// Trailing window, in characters, tested for verbatim repetition.
pub const REPETITION_WINDOW: usize = 100;

/// The repetition window is searched for within this many trailing characters.
pub const REPETITION_SEARCH_RANGE: usize = 500;

/// Repetition is re-checked every time accumulated output grows by this
/// many characters since the previous check.
pub const REPETITION_CHECK_INTERVAL: usize = 500;

/// Default number of retries after the first attempt (2 retries = 3 attempts).
pub const MAX_RETRIES: u32 = 2;

/// Output shorter than this fraction of the input segment triggers one
/// uncounted regeneration attempt. An empirically chosen floor; kept
/// configurable rather than treated as an invariant.
pub const MIN_ACCEPTABLE_RATIO: f64 = 0.6;

/// Output longer than this multiple of the input segment is truncated
/// back to a sentence boundary (runaway-generation guard).
pub const OVERSIZE_RATIO: f64 = 3.0;

/// Similarity ratio at or above which two text units are near-duplicates.
pub const SIMILARITY_THRESHOLD: f64 = 0.80;

/// Segment budget for the polish stage, in characters.
pub const POLISH_MAX_CHARS: usize = 1000;

/// Segment budget for the translate stage, in characters.
///
/// Larger than the polish budget: translation quality degrades less with
/// segment size than rewrite fidelity does.
pub const TRANSLATE_MAX_CHARS: usize = 1500;

/// Target output/input ratio band for the polish stage.
pub const TARGET_RATIO_LOW: f64 = 0.8;
pub const TARGET_RATIO_HIGH: f64 = 0.9;

/// Default directory for stage output files.
pub const OUTPUT_DIR: &str = "processed";

/// Base file names for stage outputs (timestamp inserted before the extension).
pub const POLISH_BASENAME: &str = "polished.txt";
pub const TRANSLATE_BASENAME: &str = "translation.txt";

/// Default number of concurrent segment workers (1 = sequential).
pub const CONCURRENCY: usize = 1;
