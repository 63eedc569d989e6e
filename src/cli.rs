//! Command-line interface for parley
//!
//! Provides argument parsing using clap derive macros.

use crate::config::SinkKind;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to an incremental spoken-dialogue pipeline
#[derive(Parser, Debug)]
#[command(
    name = "parley",
    version,
    about = "Talk to an incremental spoken-dialogue pipeline"
)]
pub struct Cli {
    /// Subcommand to execute (default: listen)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress dialogue echo (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// System prompt that opens the conversation
    #[arg(long, global = true, value_name = "TEXT")]
    pub system_prompt: Option<String>,

    /// Silence that ends a turn (e.g. 700ms, 1s)
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_millis)]
    pub max_silence: Option<u32>,

    /// Shortest speech accepted as a turn (e.g. 150ms)
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_millis)]
    pub min_turn: Option<u32>,

    /// Check every stream for ADD/REVOKE/COMMIT protocol violations
    #[arg(long, global = true)]
    pub validate: bool,
}

/// Parse a duration string into whole milliseconds.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`700ms`, `1s`, `1s 500ms`).
fn parse_millis(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u32>() {
        return Ok(ms);
    }
    let duration = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    u32::try_from(duration.as_millis()).map_err(|_| format!("duration too long: {}", s))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim()).map_err(|e| e.to_string())
}

fn parse_sink(s: &str) -> Result<SinkKind, String> {
    s.parse().map_err(|e: crate::error::ParleyError| e.to_string())
}

/// Options shared by the commands that run a pipeline
#[derive(Args, Debug, Default, Clone)]
pub struct OutputArgs {
    /// Where replies go: speaker or wav
    #[arg(long, value_name = "SINK", value_parser = parse_sink)]
    pub output: Option<SinkKind>,

    /// Directory for WAV replies (implies --output wav)
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Write the conversation as JSON when the pipeline stops
    #[arg(long, value_name = "PATH")]
    pub transcript: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Talk through the microphone until Enter is pressed
    Listen {
        /// Audio input device (e.g., hw:0)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run the pipeline over a WAV file
    File {
        /// WAV file with the user's side of the conversation
        wav: PathBuf,

        #[command(flatten)]
        output: OutputArgs,

        /// Give up waiting for the pipeline to go idle after this long
        #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_duration)]
        timeout: Duration,
    },

    /// View and create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List available audio devices
    #[cfg(feature = "cpal-audio")]
    Devices,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration to the configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
