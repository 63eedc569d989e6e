use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use parley::app::{apply_output_args, run_file_command, run_listen_command};
use parley::cli::{Cli, Commands, ConfigAction};
use parley::config::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!(version = %parley::version_string(), "starting parley");

    match cli.command {
        None => {
            let config = load_config(&cli)?;
            run_listen_command(config, None, cli.quiet)?;
        }
        Some(Commands::Listen {
            ref device,
            ref output,
        }) => {
            let mut config = load_config(&cli)?;
            if let Some(device) = device {
                config.audio.device = Some(device.clone());
            }
            apply_output_args(&mut config, output);
            run_listen_command(config, output.transcript.clone(), cli.quiet)?;
        }
        Some(Commands::File {
            ref wav,
            ref output,
            timeout,
        }) => {
            let mut config = load_config(&cli)?;
            apply_output_args(&mut config, output);
            run_file_command(config, wav, output.transcript.clone(), timeout, cli.quiet)?;
        }
        Some(Commands::Config { ref action }) => {
            handle_config_command(action, &cli)?;
        }
        #[cfg(feature = "cpal-audio")]
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Log level comes from RUST_LOG when set, otherwise from -q/-v.
fn init_logging(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "parley=info,warn",
        (false, 2) => "parley=debug,info",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(Config::default_path()?),
    }
}

/// Load configuration with priority:
/// 1. Custom path from --config (must exist)
/// 2. Default config path (~/.config/parley/config.toml)
/// 3. Built-in defaults
///
/// then environment variable overrides, then command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    config = config.with_env_overrides()?;

    if let Some(prompt) = &cli.system_prompt {
        config.dialogue.system_prompt = prompt.clone();
    }
    if let Some(ms) = cli.max_silence {
        config.turn.max_silence_ms = ms;
    }
    if let Some(ms) = cli.min_turn {
        config.turn.min_turn_ms = ms;
    }
    if cli.validate {
        config.pipeline.validate_protocol = true;
    }

    config.validate()?;
    Ok(config)
}

fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    let path = config_path(cli)?;
    match action {
        ConfigAction::Show => {
            print!("{}", load_config(cli)?.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            write_default_config(&path, *force)?;
            println!("{}", format!("Wrote {}", path.display()).green());
        }
    }
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, Config::default().to_toml()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// List available audio input and output devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let inputs = parley::audio::capture::list_input_devices()?;
    let outputs = parley::audio::playback::list_output_devices()?;

    println!("Input devices:");
    if inputs.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    println!("Output devices:");
    if outputs.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}
