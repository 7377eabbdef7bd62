//! Application entry points for the processing subcommands.
//!
//! Composition root: builds the HTTP client, transport adapter, supervisor,
//! retry layer and pipeline from configuration plus CLI flags, wires the
//! progress channel to the terminal renderer, and writes stage files.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::GenerationArgs;
use crate::config::{Config, Protocol};
use crate::error::{RedraftError, Result};
use crate::generate::{
    Generator, OllamaTransport, OpenAiTransport, StreamSupervisor, GenerationTransport,
};
use crate::output;
use crate::pipeline::{Pipeline, PipelineOptions, RunReport, TaskSpec};
use crate::prompt::PromptTemplate;
use crate::transcript;

/// Result of one executed stage.
pub struct StageOutcome {
    pub document: String,
    pub report: RunReport,
    /// Written output file.
    pub path: PathBuf,
}

/// Polish a raw transcript and write the stage file.
pub async fn run_polish(
    config: Config,
    input: Option<PathBuf>,
    args: GenerationArgs,
    quiet: bool,
) -> Result<()> {
    let config = effective_config(config, &args)?;
    let text = read_input_text(input.as_deref())?;
    let task = stage_task(
        TaskSpec::polish(),
        &config,
        &args,
        config.chunking.polish_max_chars,
    )?;

    if args.dry_run {
        print_dry_run(&text, &task);
        return Ok(());
    }

    let outcome = run_stage(&config, &args, task, &text, quiet).await?;
    output::render_summary(&outcome.report);
    eprintln!("Saved: {}", outcome.path.display());
    Ok(())
}

/// Translate a polished transcript and write the stage file.
///
/// Without an explicit input, chains from the newest `polished_*` file in
/// the output directory.
pub async fn run_translate(
    config: Config,
    input: Option<PathBuf>,
    args: GenerationArgs,
    quiet: bool,
) -> Result<()> {
    let config = effective_config(config, &args)?;
    let input_path = match input {
        Some(path) => path,
        None => {
            let prefix = output::stage_prefix(crate::defaults::POLISH_BASENAME);
            let found = output::find_latest(&config.output.dir, &prefix)?;
            eprintln!("Using latest polish output: {}", found.display());
            found
        }
    };
    let text = read_input_text(Some(&input_path))?;
    let task = stage_task(
        TaskSpec::translate(),
        &config,
        &args,
        config.chunking.translate_max_chars,
    )?;

    if args.dry_run {
        print_dry_run(&text, &task);
        return Ok(());
    }

    let outcome = run_stage(&config, &args, task, &text, quiet).await?;
    output::render_summary(&outcome.report);
    eprintln!("Saved: {}", outcome.path.display());
    Ok(())
}

/// Polish then translate in one run, chaining in memory.
pub async fn run_chain(
    config: Config,
    input: Option<PathBuf>,
    args: GenerationArgs,
    quiet: bool,
) -> Result<()> {
    let config = effective_config(config, &args)?;
    let text = read_input_text(input.as_deref())?;

    let polish_task = stage_task(
        TaskSpec::polish(),
        &config,
        &args,
        config.chunking.polish_max_chars,
    )?;
    // --max-chars and --template target the polish stage; the translate
    // stage keeps its configured budget and built-in template.
    let translate_args = GenerationArgs {
        max_chars: None,
        template: None,
        start_segment: 1,
        ..args.clone()
    };
    let translate_task = stage_task(
        TaskSpec::translate(),
        &config,
        &translate_args,
        config.chunking.translate_max_chars,
    )?;

    if args.dry_run {
        print_dry_run(&text, &polish_task);
        return Ok(());
    }

    let polished = run_stage(&config, &args, polish_task, &text, quiet).await?;
    output::render_summary(&polished.report);
    eprintln!("Saved: {}", polished.path.display());

    let translated = run_stage(
        &config,
        &translate_args,
        translate_task,
        &polished.document,
        quiet,
    )
    .await?;
    output::render_summary(&translated.report);
    eprintln!("Saved: {}", translated.path.display());
    Ok(())
}

/// Builds and runs one pipeline stage, rendering progress as it happens.
async fn run_stage(
    config: &Config,
    args: &GenerationArgs,
    task: TaskSpec,
    input_text: &str,
    quiet: bool,
) -> Result<StageOutcome> {
    let client = crate::generate::transport::build_client(Duration::from_secs(30))?;
    let transport = build_transport(client, config)?;
    let supervisor = StreamSupervisor::new(transport, config.watchdog.to_watchdog_config());
    let generator = Generator::new(supervisor, config.retry.to_policy());

    let options = PipelineOptions {
        start_segment: args.start_segment.max(1),
        concurrency: args.jobs.max(1),
        stream: config.endpoint.stream,
        dedup_threshold: config.dedup.similarity_threshold,
        oversize_ratio: crate::defaults::OVERSIZE_RATIO,
    };

    let (progress_tx, progress_rx) = crossbeam_channel::unbounded();
    let printer = std::thread::spawn(move || {
        for event in progress_rx.iter() {
            output::render_event(&event, quiet);
        }
    });

    let basename = task.output_basename;
    let pipeline = Pipeline::new(generator, task, options).with_progress(progress_tx);
    let (document, report) = pipeline.run(input_text).await;

    // Dropping the pipeline closes the progress channel and ends the printer.
    drop(pipeline);
    if printer.join().is_err() {
        eprintln!("redraft: progress renderer thread panicked");
    }

    let path = output::write_stage_file(&config.output.dir, basename, &document)?;
    Ok(StageOutcome {
        document,
        report,
        path,
    })
}

/// Applies CLI overrides onto the loaded configuration.
fn effective_config(mut config: Config, args: &GenerationArgs) -> Result<Config> {
    if let Some(url) = &args.endpoint {
        config.endpoint.url = url.clone();
    }
    if let Some(model) = &args.model {
        config.endpoint.model = model.clone();
    }
    if let Some(protocol) = &args.protocol {
        config.endpoint.protocol = Protocol::parse(protocol)?;
    }
    if let Some(dir) = &args.out_dir {
        config.output.dir = dir.clone();
    }
    if let Some(secs) = args.hard_timeout {
        config.watchdog.hard_timeout_secs = secs;
    }
    if let Some(secs) = args.idle_interval {
        config.watchdog.idle_interval_secs = secs;
    }
    if args.no_stream {
        config.endpoint.stream = false;
    }
    Ok(config)
}

/// Resolves a stage's task spec from config plus CLI flags.
fn stage_task(
    base: TaskSpec,
    config: &Config,
    args: &GenerationArgs,
    configured_max_chars: usize,
) -> Result<TaskSpec> {
    let mut task = base.with_max_chars(args.max_chars.unwrap_or(configured_max_chars));
    task.params = config.sampling.apply(task.params);
    if let Some(path) = &args.template {
        task = task.with_template(PromptTemplate::from_file(path)?);
    }
    Ok(task)
}

fn build_transport(
    client: reqwest::Client,
    config: &Config,
) -> Result<Arc<dyn GenerationTransport>> {
    Ok(match config.endpoint.protocol {
        Protocol::Ollama => Arc::new(OllamaTransport::new(
            client,
            &config.endpoint.url,
            &config.endpoint.model,
        )?),
        Protocol::Openai => Arc::new(OpenAiTransport::new(
            client,
            &config.endpoint.url,
            &config.endpoint.model,
        )?),
    })
}

/// Reads the input transcript from a file, or stdin when piped.
fn read_input_text(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => fs_read(path),
        None => {
            if std::io::stdin().is_terminal() {
                return Err(RedraftError::Other(
                    "no input file given and stdin is a terminal \
                     (pass a file path or pipe the transcript in)"
                        .to_string(),
                ));
            }
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn fs_read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RedraftError::InputNotFound {
                path: path.display().to_string(),
            }
        } else {
            RedraftError::Io(e)
        }
    })
}

/// Chunk the input and report segments without touching the endpoint.
fn print_dry_run(text: &str, task: &TaskSpec) {
    let segments = transcript::split(text, task.max_chars);
    println!(
        "{}: {} chars would split into {} segment(s) (budget {} chars):",
        task.name,
        text.chars().count(),
        segments.len(),
        task.max_chars
    );
    for (i, segment) in segments.iter().enumerate() {
        let preview: String = segment.text.chars().take(32).collect();
        println!(
            "  [{}/{}] {} chars  {}…",
            i + 1,
            segments.len(),
            segment.char_count(),
            preview
        );
    }
}
