//! Near-duplicate removal for generated output.
//!
//! Generation loops and hallucinated restarts show up as sentences or whole
//! speaker paragraphs that repeat with small wording drift. Two passes catch
//! them: a whole-text sentence pass, then a same-speaker paragraph pass.
//! Within a colliding pair the longer unit survives (it is usually the more
//! complete one); ties keep the first-seen unit. `dedup` is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::transcript::has_speaker_tags;

/// Sentence-terminal characters that close a dedup unit.
const UNIT_TERMINALS: &[char] = &['。', '！', '？', '；'];

/// Punctuation stripped (with whitespace) before similarity comparison.
const COMPARE_STRIP: &[char] = &['。', '！', '？', '；', '，', '、'];

/// Leading speaker tag of a paragraph: `[label]：` or `【label】：`.
static PARAGRAPH_TAG: Lazy<Regex> = Lazy::new(|| {
    // SAFETY: hardcoded pattern — always valid
    #[allow(clippy::expect_used)]
    Regex::new(r"^(?:\[[^\]]+\]|【[^】]+】)[：:]").expect("hardcoded paragraph tag pattern")
});

/// Removes near-duplicate sentences and same-speaker paragraphs.
///
/// `threshold` is the normalized edit-similarity ratio at or above which two
/// units count as duplicates (0.80 by default).
pub fn dedup(text: &str, threshold: f64) -> String {
    let deduped = dedup_sentences(text, threshold);
    if has_speaker_tags(&deduped) {
        dedup_paragraphs(&deduped, threshold)
    } else {
        deduped
    }
}

/// Normalized edit similarity over punctuation/whitespace-stripped content.
fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

fn strip_for_compare(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !COMPARE_STRIP.contains(c))
        .collect()
}

/// A kept unit plus its precomputed comparison key.
struct Unit {
    text: String,
    stripped: String,
    chars: usize,
    /// Index of the paragraph the unit was extracted from (sentence pass)
    /// or the paragraph's own position (paragraph pass).
    slot: usize,
}

impl Unit {
    fn new(text: String, stripped: String, slot: usize) -> Self {
        let chars = text.chars().count();
        Self {
            text,
            stripped,
            chars,
            slot,
        }
    }
}

/// Folds `candidate` into `kept`: dropped if a near-duplicate of a shorter or
/// equal kept unit, replacing the kept unit in place if strictly longer.
fn fold_unit(kept: &mut Vec<Unit>, candidate: Unit, threshold: f64) {
    if !candidate.stripped.is_empty() {
        for existing in kept.iter_mut() {
            if existing.stripped.is_empty() {
                continue;
            }
            if similarity(&candidate.stripped, &existing.stripped) >= threshold {
                if candidate.chars > existing.chars {
                    // The longer unit wins but stays at the kept position,
                    // so surviving order matches first appearance.
                    existing.text = candidate.text;
                    existing.stripped = candidate.stripped;
                    existing.chars = candidate.chars;
                }
                return;
            }
        }
    }
    kept.push(candidate);
}

/// Sentence-scope pass over the whole text.
///
/// Units end at `。！？；`; an unterminated remainder is its own unit. The
/// scope is global — a sentence repeated in a later paragraph is still a
/// duplicate — but paragraph boundaries (blank lines) are preserved in the
/// reassembled output so the paragraph pass can still see them.
fn dedup_sentences(text: &str, threshold: f64) -> String {
    let mut kept: Vec<Unit> = Vec::new();

    for (slot, paragraph) in text.split("\n\n").enumerate() {
        for sentence in split_units(paragraph) {
            let stripped = strip_for_compare(&sentence);
            fold_unit(&mut kept, Unit::new(sentence, stripped, slot), threshold);
        }
    }

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current_slot = None;
    for unit in &kept {
        if current_slot != Some(unit.slot) {
            paragraphs.push(String::new());
            current_slot = Some(unit.slot);
        }
        // SAFETY: a paragraph was just pushed for this slot
        #[allow(clippy::expect_used)]
        paragraphs
            .last_mut()
            .expect("paragraph group exists")
            .push_str(&unit.text);
    }

    paragraphs.retain(|p| !p.trim().is_empty());
    paragraphs.join("\n\n")
}

/// Paragraph-scope pass: only paragraphs sharing the same speaker tag are
/// compared, on tag-stripped content.
fn dedup_paragraphs(text: &str, threshold: f64) -> String {
    struct Paragraph {
        unit: Unit,
        tag: Option<String>,
    }

    let mut kept: Vec<Paragraph> = Vec::new();

    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tag = PARAGRAPH_TAG
            .find(trimmed)
            .map(|m| m.as_str().to_string());
        let content = tag
            .as_deref()
            .map(|t| trimmed[t.len()..].trim())
            .unwrap_or(trimmed);
        let stripped = strip_for_compare(content);
        let chars = trimmed.chars().count();

        let mut duplicate = false;
        if let Some(ref this_tag) = tag
            && !stripped.is_empty()
        {
            for existing in kept.iter_mut() {
                let same_speaker = existing.tag.as_deref() == Some(this_tag.as_str());
                if !same_speaker || existing.unit.stripped.is_empty() {
                    continue;
                }
                if similarity(&stripped, &existing.unit.stripped) >= threshold {
                    if chars > existing.unit.chars {
                        existing.unit.text = trimmed.to_string();
                        existing.unit.stripped = stripped.clone();
                        existing.unit.chars = chars;
                    }
                    duplicate = true;
                    break;
                }
            }
        }

        if !duplicate {
            kept.push(Paragraph {
                unit: Unit::new(trimmed.to_string(), stripped, kept.len()),
                tag,
            });
        }
    }

    kept.iter()
        .map(|p| p.unit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extracts trimmed sentence units, delimiters attached, remainder kept.
fn split_units(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if UNIT_TERMINALS.contains(&ch) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                units.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        units.push(trimmed.to_string());
    }

    units
}
