//! Stage output files and shared terminal rendering.
//!
//! Every pipeline stage writes one UTF-8 file named with its base name plus
//! a generation timestamp, so successive runs never clobber each other and
//! the translate stage can chain from the newest polish output.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{RedraftError, Result};
use crate::generate::GenerationStatus;
use crate::pipeline::{ProgressEvent, RunReport};

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Inserts a `YYYYMMDD_HHMMSS` timestamp before the extension.
///
/// `polished.txt` becomes `polished_20250806_143020.txt`; a base name
/// without an extension gets the timestamp appended.
pub fn timestamped_filename(base: &str, now: DateTime<Local>) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    match base.rsplit_once('.') {
        Some((name, ext)) => format!("{name}_{timestamp}.{ext}"),
        None => format!("{base}_{timestamp}"),
    }
}

/// Writes one stage's output under `dir`, creating the directory if needed.
pub fn write_stage_file(dir: &Path, base: &str, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(timestamped_filename(base, Local::now()));
    fs::write(&path, content)?;
    Ok(path)
}

/// Finds the newest file in `dir` whose name starts with `prefix`.
///
/// Used by the translate stage to chain from the latest `polished_*` file
/// when no explicit input is given.
pub fn find_latest(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let not_found = || RedraftError::NoStageOutput {
        prefix: prefix.to_string(),
        dir: dir.display().to_string(),
    };

    let entries = fs::read_dir(dir).map_err(|_| not_found())?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    for entry in entries.flatten() {
        let path = entry.path();
        let matches_prefix = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if !matches_prefix || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    newest.map(|(_, path)| path).ok_or_else(not_found)
}

/// Strips the extension from a stage base name: `polished.txt` → `polished_`.
pub fn stage_prefix(base: &str) -> String {
    match base.rsplit_once('.') {
        Some((name, _)) => format!("{name}_"),
        None => format!("{base}_"),
    }
}

/// Renders one progress event as console lines.
///
/// One line per segment: input size, target band, output size and ratio
/// classification against the 80–90% target band.
pub fn render_event(event: &ProgressEvent, quiet: bool) {
    if quiet {
        return;
    }
    match event {
        ProgressEvent::RunStarted {
            task,
            segments,
            input_chars,
        } => {
            eprintln!("{task}: {input_chars} chars split into {segments} segment(s)");
        }
        ProgressEvent::SegmentStarted {
            index,
            total,
            input_chars,
            target_min,
            target_max,
        } => {
            eprintln!(
                "[{index}/{total}] processing… {DIM}(input: {input_chars} chars, target: {target_min}-{target_max}){RESET}"
            );
        }
        ProgressEvent::SegmentFinished { total, report } => {
            let ratio_percent = report.ratio() * 100.0;
            if report.fell_back {
                eprintln!(
                    "[{index}/{total}] {RED}✗ generation failed — using original text{RESET} {DIM}({reason}){RESET}",
                    index = report.index,
                    reason = report.reason.as_deref().unwrap_or("no reason recorded"),
                );
                return;
            }
            if report.dedup_removed > 0 {
                eprintln!(
                    "  {DIM}dedup: removed {} chars{RESET}",
                    report.dedup_removed
                );
            }
            if report.truncated {
                eprintln!("  {YELLOW}oversized output truncated{RESET}");
            }
            eprintln!(
                "[{index}/{total}] {GREEN}✓{RESET} {status}: {output} chars ({ratio_percent:.1}%){verdict}",
                index = report.index,
                status = report.status.label(),
                output = report.output_chars,
                verdict = ratio_verdict(ratio_percent),
            );
        }
        ProgressEvent::RunFinished { .. } => {}
    }
}

fn ratio_verdict(ratio_percent: f64) -> String {
    if (80.0..=90.0).contains(&ratio_percent) {
        format!(" {GREEN}— ideal range{RESET}")
    } else if ratio_percent < 70.0 {
        format!(" {YELLOW}— short, content may be lost{RESET}")
    } else if ratio_percent > 100.0 {
        format!(" {YELLOW}— longer than input{RESET}")
    } else {
        String::new()
    }
}

/// Prints the terminal summary for one run.
pub fn render_summary(report: &RunReport) {
    let ratio_percent = report.overall_ratio() * 100.0;

    eprintln!();
    eprintln!("{} summary:", report.task);
    eprintln!("  {DIM}Input:{RESET}     {} chars", report.input_chars);
    eprintln!(
        "  {DIM}Output:{RESET}    {} chars ({ratio_percent:.1}%)",
        report.output_chars
    );
    for (status, count) in report.status_counts() {
        let colored = match status {
            GenerationStatus::Completed => format!("{GREEN}{}{RESET}", status.label()),
            GenerationStatus::Stalled | GenerationStatus::RepetitionStopped => {
                format!("{YELLOW}{}{RESET}", status.label())
            }
            _ => format!("{RED}{}{RESET}", status.label()),
        };
        eprintln!("  {DIM}Segments:{RESET}  {count} {colored}");
    }
    if report.fallback_count() > 0 {
        eprintln!(
            "  {DIM}Fallback:{RESET}  {} segment(s) kept original text",
            report.fallback_count()
        );
    }
    if report.dedup_count() > 0 {
        eprintln!(
            "  {DIM}Dedup:{RESET}     {} segment(s) had duplicates removed",
            report.dedup_count()
        );
    }
}
