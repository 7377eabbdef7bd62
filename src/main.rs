use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use redraft::app::{run_chain, run_polish, run_translate};
use redraft::cli::{Cli, Commands, ConfigAction};
use redraft::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Polish { input, generation } => {
            let config = load_config(cli.config.as_deref())?;
            if let Err(e) = run_polish(config, input, generation, cli.quiet).await {
                fail(&e.to_string());
            }
        }
        Commands::Translate { input, generation } => {
            let config = load_config(cli.config.as_deref())?;
            if let Err(e) = run_translate(config, input, generation, cli.quiet).await {
                fail(&e.to_string());
            }
        }
        Commands::Run { input, generation } => {
            let config = load_config(cli.config.as_deref())?;
            if let Err(e) = run_chain(config, input, generation, cli.quiet).await {
                fail(&e.to_string());
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "redraft",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/redraft/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        let default_path = Config::default_path();
        Config::load_or_default(&default_path)
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Get { key } => {
            let config = Config::load_or_default(&config_path).with_env_overrides();
            match config.get_value_by_path(&key) {
                Ok(value) => println!("{}", value),
                Err(e) => fail(&e.to_string()),
            }
        }
        ConfigAction::Set { key, value } => {
            Config::set_value_by_path(&config_path, &key, &value)?;
            println!("Set {} = {}", key, value);
        }
        ConfigAction::List { section } => {
            let config = Config::load_or_default(&config_path).with_env_overrides();
            match section.as_deref() {
                Some(section) => match config.display_section(section) {
                    Ok(toml) => print!("{}", toml),
                    Err(e) => fail(&e.to_string()),
                },
                None => match config.to_display_toml() {
                    Ok(toml) => print!("{}", toml),
                    Err(e) => fail(&e.to_string()),
                },
            }
        }
        ConfigAction::Dump => {
            print!("{}", Config::dump_template());
        }
    }
    Ok(())
}

/// Print an error and exit with a failure status.
fn fail(message: &str) -> ! {
    eprintln!("{}", format!("Error: {}", message).red());
    std::process::exit(1);
}
