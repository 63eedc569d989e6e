use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::pipeline::graph::GraphConfig;
use crate::turn::TurnConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub turn: TurnSettings,
    pub dialogue: DialogueConfig,
    pub tts: TtsConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
}

/// Turn detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnSettings {
    pub min_turn_ms: u32,
    pub max_silence_ms: u32,
    pub vad_threshold: f32,
    /// Adapt the speech threshold to the background noise level.
    pub auto_level: bool,
}

/// Conversation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DialogueConfig {
    pub system_prompt: String,
    /// Number of user/assistant exchanges to remember (0 = unlimited).
    pub max_turns: usize,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub sample_rate: u32,
    /// Rate of the audio handed to the sink; defaults to `sample_rate`.
    pub output_sample_rate: Option<u32>,
    pub queue_capacity: usize,
}

/// Where replies are played or stored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Speaker,
    Wav,
}

impl std::str::FromStr for SinkKind {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "speaker" => Ok(SinkKind::Speaker),
            "wav" => Ok(SinkKind::Wav),
            other => Err(ParleyError::ConfigInvalidValue {
                key: "output.sink".to_string(),
                message: format!("unknown sink '{}' (expected speaker or wav)", other),
            }),
        }
    }
}

/// Reply output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub sink: SinkKind,
    pub device: Option<String>,
    /// Directory for WAV replies, also the fallback when no speaker is available.
    pub directory: PathBuf,
}

/// Graph runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    /// Check every emitted stream for ADD/REVOKE/COMMIT protocol violations.
    pub validate_protocol: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            min_turn_ms: defaults::MIN_TURN_MS,
            max_silence_ms: defaults::MAX_SILENCE_MS,
            vad_threshold: defaults::VAD_THRESHOLD,
            auto_level: false,
        }
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            max_turns: 0,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::TTS_SAMPLE_RATE,
            output_sample_rate: None,
            queue_capacity: defaults::TTS_QUEUE_CAPACITY,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Speaker,
            device: None,
            directory: PathBuf::from("replies"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::CHANNEL_CAPACITY,
            validate_protocol: false,
        }
    }
}

impl TtsConfig {
    pub fn effective_output_rate(&self) -> u32 {
        self.output_sample_rate.unwrap_or(self.sample_rate)
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ParleyError {
    ParleyError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ParleyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PARLEY_SYSTEM_PROMPT → dialogue.system_prompt
    /// - PARLEY_AUDIO_DEVICE → audio.device
    /// - PARLEY_OUTPUT → output.sink
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(prompt) = std::env::var("PARLEY_SYSTEM_PROMPT")
            && !prompt.is_empty()
        {
            self.dialogue.system_prompt = prompt;
        }

        if let Ok(device) = std::env::var("PARLEY_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(sink) = std::env::var("PARLEY_OUTPUT")
            && !sink.is_empty()
        {
            self.output.sink = sink.parse()?;
        }

        Ok(self)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/parley/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("parley").join("config.toml"))
            .ok_or_else(|| ParleyError::Other("Could not determine config directory".to_string()))
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than 0"));
        }
        if self.audio.frame_ms == 0 {
            return Err(invalid("audio.frame_ms", "must be greater than 0"));
        }
        if (self.audio.sample_rate as u64 * self.audio.frame_ms as u64) % 1000 != 0 {
            return Err(invalid(
                "audio.frame_ms",
                format!(
                    "{} ms is not a whole number of samples at {} Hz",
                    self.audio.frame_ms, self.audio.sample_rate
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.turn.vad_threshold) {
            return Err(invalid("turn.vad_threshold", "must be between 0.0 and 1.0"));
        }
        if self.tts.sample_rate == 0 || self.tts.effective_output_rate() == 0 {
            return Err(invalid("tts.sample_rate", "must be greater than 0"));
        }
        if self.tts.queue_capacity == 0 {
            return Err(invalid("tts.queue_capacity", "must be greater than 0"));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(invalid("pipeline.channel_capacity", "must be greater than 0"));
        }
        Ok(())
    }

    /// Turn detector settings in the detector's own units.
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig::from_millis(
            self.audio.frame_ms,
            self.turn.min_turn_ms,
            self.turn.max_silence_ms,
        )
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            channel_capacity: self.pipeline.channel_capacity,
            validate_protocol: self.pipeline.validate_protocol,
            poll_interval: Duration::from_millis(defaults::WORKER_POLL_MS),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ParleyError::ConfigParse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_parley_env() {
        remove_env("PARLEY_SYSTEM_PROMPT");
        remove_env("PARLEY_AUDIO_DEVICE");
        remove_env("PARLEY_OUTPUT");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_ms, 20);

        assert_eq!(config.turn.min_turn_ms, 150);
        assert_eq!(config.turn.max_silence_ms, 700);
        assert!(!config.turn.auto_level);

        assert_eq!(config.dialogue.system_prompt, defaults::SYSTEM_PROMPT);
        assert_eq!(config.dialogue.max_turns, 0);

        assert_eq!(config.tts.sample_rate, 24000);
        assert_eq!(config.tts.effective_output_rate(), 24000);

        assert_eq!(config.output.sink, SinkKind::Speaker);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [turn]
            max_silence_ms = 500

            [output]
            sink = "wav"
            directory = "/tmp/replies"
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.turn.max_silence_ms, 500);
        assert_eq!(config.turn.min_turn_ms, 150);
        assert_eq!(config.output.sink, SinkKind::Wav);
        assert_eq!(config.output.directory, PathBuf::from("/tmp/replies"));
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[audio\nsample_rate = ").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Configuration error"));
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.dialogue.max_turns = 4;
        config.tts.output_sample_rate = Some(48000);

        let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_fractional_frames() {
        let mut config = Config::default();
        config.audio.sample_rate = 44100;
        config.audio.frame_ms = 15;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audio.frame_ms"));

        config.audio.frame_ms = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tts.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tts.output_sample_rate = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_turn_config_uses_frame_length() {
        let turn = Config::default().turn_config();
        assert_eq!(turn.frame, Duration::from_millis(20));
        assert_eq!(turn.min_turn, Duration::from_millis(150));
        assert_eq!(turn.max_silence, Duration::from_millis(700));
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parley_env();

        set_env("PARLEY_SYSTEM_PROMPT", "Answer like a pirate.");
        set_env("PARLEY_AUDIO_DEVICE", "hw:1,0");
        set_env("PARLEY_OUTPUT", "wav");
        let config = Config::default().with_env_overrides().unwrap();
        clear_parley_env();

        assert_eq!(config.dialogue.system_prompt, "Answer like a pirate.");
        assert_eq!(config.audio.device.as_deref(), Some("hw:1,0"));
        assert_eq!(config.output.sink, SinkKind::Wav);
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parley_env();

        set_env("PARLEY_SYSTEM_PROMPT", "");
        let config = Config::default().with_env_overrides().unwrap();
        clear_parley_env();

        assert_eq!(config.dialogue.system_prompt, defaults::SYSTEM_PROMPT);
    }

    #[test]
    fn test_env_override_unknown_sink_is_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parley_env();

        set_env("PARLEY_OUTPUT", "telepathy");
        let result = Config::default().with_env_overrides();
        clear_parley_env();

        assert!(result.is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Ok(path) = Config::default_path() {
            assert!(path.ends_with("parley/config.toml"));
        }
    }
}
