//! Command-line interface for redraft
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Transcript polishing and translation via local LLM endpoints
#[derive(Parser, Debug)]
#[command(
    name = "redraft",
    version,
    about = "Transcript polishing and translation via local LLM endpoints"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress progress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: per-segment detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Generation flags shared by the processing subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct GenerationArgs {
    /// Endpoint base URL (default: http://localhost:11434)
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Model tag requested from the endpoint
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Wire protocol (ollama, openai)
    #[arg(long, value_name = "PROTOCOL")]
    pub protocol: Option<String>,

    /// Segment budget in characters (overrides the per-stage default)
    #[arg(long, value_name = "CHARS")]
    pub max_chars: Option<usize>,

    /// Resume from this 1-based segment, skipping earlier ones
    #[arg(long, value_name = "N", default_value = "1")]
    pub start_segment: usize,

    /// Concurrent segment workers (1 = sequential)
    #[arg(long, short = 'j', value_name = "N", default_value = "1")]
    pub jobs: usize,

    /// Disable streamed output (also disables stall/repetition watchdogs)
    #[arg(long)]
    pub no_stream: bool,

    /// Chunk the input and report segments without calling the endpoint
    #[arg(long)]
    pub dry_run: bool,

    /// Output directory for stage files (default: processed/)
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Custom prompt template file ({text} placeholder required)
    #[arg(long, value_name = "PATH")]
    pub template: Option<PathBuf>,

    /// Hard timeout per request (e.g. 180s, 5m)
    #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
    pub hard_timeout: Option<u64>,

    /// Idle interval per stall strike (e.g. 30s, 1m)
    #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
    pub idle_interval: Option<u64>,
}

/// Parse a duration string into seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers
/// (seconds), single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`).
fn parse_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rewrite a raw transcript into written style
    Polish {
        /// Input transcript file (reads stdin when omitted and piped)
        input: Option<PathBuf>,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Translate a polished transcript into English
    Translate {
        /// Input file (default: newest polished_* file in the output dir)
        input: Option<PathBuf>,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Polish then translate in one run
    Run {
        /// Input transcript file (reads stdin when omitted and piped)
        input: Option<PathBuf>,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value by dotted path (e.g. endpoint.url)
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value by dotted path
    Set {
        /// Configuration key
        key: String,
        /// New value
        value: String,
    },

    /// Show the effective configuration (optionally one section)
    List {
        /// Section to show (endpoint, sampling, chunking, watchdog, retry, dedup, output)
        section: Option<String>,
    },

    /// Print a commented configuration template
    Dump,
}
