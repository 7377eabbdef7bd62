//! Transcript parsing and segmentation.
//!
//! A transcript is an ordered sequence of speaker-tagged utterances. Lines
//! beginning with `[label]：` (full-width or ASCII colon) start a speaker
//! block; following untagged lines belong to the same block. Blocks are
//! packed whole into bounded-size segments for submission to the generation
//! endpoint — a block is never split mid-utterance. Transcripts without any
//! speaker tags fall back to sentence-boundary packing.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a speaker tag at the start of a line: `[label]：` or `[label]:`.
static SPEAKER_TAG: Lazy<Regex> = Lazy::new(|| {
    // SAFETY: hardcoded pattern — always valid
    #[allow(clippy::expect_used)]
    Regex::new(r"^\[([^\]]+)\][：:]").expect("hardcoded speaker tag pattern")
});

/// Matches a rendered speaker tag anywhere: `[label]：` or `【label】：`.
static ANY_SPEAKER_TAG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?:\[[^\]]+\]|【[^】]+】)[：:]").expect("hardcoded speaker tag pattern")
});

/// Matches a formatted speaker tag: `【label】`.
static FORMATTED_TAG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"【[^】]+】").expect("hardcoded formatted tag pattern")
});

/// Sentence-terminal characters used by the fallback splitter.
const SENTENCE_TERMINALS: &[char] = &['。', '！', '？', '；', '…', '\n'];

/// A maximal run of input text attributable to one speaker tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerBlock {
    /// Free-form speaker label, without brackets.
    pub speaker: String,
    /// Concatenated content of all lines in the block, trimmed.
    pub content: String,
}

impl SpeakerBlock {
    /// Renders the block back to its tagged single-line form.
    pub fn render(&self) -> String {
        format!("[{}]：{}", self.speaker, self.content)
    }
}

/// One unit submitted to the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
}

impl Segment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Segment length in Unicode scalar values.
    ///
    /// Character counts (not bytes) are the unit of every budget and ratio
    /// in this crate — inputs are predominantly CJK.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Returns true if the text contains any speaker tag, raw or formatted.
pub fn has_speaker_tags(text: &str) -> bool {
    ANY_SPEAKER_TAG.is_match(text)
}

/// Extracts speaker blocks from a transcript by line scan.
///
/// A tagged line starts a new block; untagged lines before the first tag are
/// ignored. Blocks whose content is empty after trimming are dropped — an
/// empty speaker turn never produces a segment.
pub fn split_speaker_blocks(text: &str) -> Vec<SpeakerBlock> {
    let mut blocks = Vec::new();
    let mut current_speaker: Option<String> = None;
    let mut current_content = String::new();

    let flush = |speaker: &mut Option<String>, content: &mut String, out: &mut Vec<SpeakerBlock>| {
        if let Some(label) = speaker.take() {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                out.push(SpeakerBlock {
                    speaker: label,
                    content: trimmed.to_string(),
                });
            }
            content.clear();
        }
    };

    for line in text.lines() {
        if let Some(caps) = SPEAKER_TAG.captures(line) {
            flush(&mut current_speaker, &mut current_content, &mut blocks);
            // SAFETY: group 1 always present in the pattern
            #[allow(clippy::expect_used)]
            let label = caps.get(1).expect("speaker capture group").as_str();
            let tag_len = caps.get(0).map(|m| m.end()).unwrap_or(0);
            current_speaker = Some(label.to_string());
            current_content.push_str(&line[tag_len..]);
        } else if current_speaker.is_some() {
            current_content.push_str(line);
        }
    }
    flush(&mut current_speaker, &mut current_content, &mut blocks);

    blocks
}

/// Splits text into sentence-like units on terminal punctuation, keeping the
/// trailing delimiter run attached to the preceding sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut in_delimiter_run = false;

    for ch in text.chars() {
        let is_delim = SENTENCE_TERMINALS.contains(&ch);
        if in_delimiter_run && !is_delim {
            sentences.push(std::mem::take(&mut current));
            in_delimiter_run = false;
        }
        current.push(ch);
        if is_delim {
            in_delimiter_run = true;
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }

    sentences
}

/// Splits a transcript into ordered segments of at most `max_chars`
/// characters.
///
/// With speaker tags present, whole blocks are packed greedily: a block is
/// appended while `current + block <= max_chars` (the boundary is inclusive).
/// A single block longer than the budget still lands whole in its own
/// segment. Without tags, sentences are packed the same way. Empty or
/// whitespace-only input yields no segments.
pub fn split(text: &str, max_chars: usize) -> Vec<Segment> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let blocks = split_speaker_blocks(text);
    if blocks.is_empty() {
        return pack(split_sentences(text), max_chars, "");
    }

    let rendered: Vec<String> = blocks.iter().map(SpeakerBlock::render).collect();
    pack(rendered, max_chars, "\n\n")
}

/// Greedy packer shared by the block and sentence paths.
fn pack(pieces: Vec<String>, max_chars: usize, separator: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for piece in pieces {
        let piece_chars = piece.chars().count();
        if current_chars + piece_chars <= max_chars {
            if !current.is_empty() {
                current.push_str(separator);
                current_chars += separator.chars().count();
            }
            current.push_str(&piece);
            current_chars += piece_chars;
        } else {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                segments.push(Segment::new(trimmed));
            }
            current = piece;
            current_chars = current.chars().count();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(Segment::new(trimmed));
    }

    segments
}

/// Ensures every formatted speaker tag (`【label】`) starts on its own line.
///
/// Generated output sometimes runs speakers together on one line; this
/// inserts a newline before each tag that is not already at the start of the
/// text, then strips any leading newlines.
pub fn format_speaker_paragraphs(text: &str) -> String {
    let mut formatted = String::with_capacity(text.len());
    let mut last_end = 0;

    for m in FORMATTED_TAG.find_iter(text) {
        formatted.push_str(&text[last_end..m.start()]);
        if m.start() > 0 {
            formatted.push('\n');
        }
        formatted.push_str(m.as_str());
        last_end = m.end();
    }
    formatted.push_str(&text[last_end..]);

    formatted.trim_start_matches('\n').to_string()
}
