//! Spoken-dialogue application entry point.
//!
//! Wires the complete flow:
//! source → turn → recognizer → responder → synthesizer → sink

#[cfg(feature = "cpal-audio")]
use crate::audio::capture::CpalAudioSource;
use crate::audio::source::AudioSource;
use crate::audio::station::SourceModule;
use crate::audio::vad::{EnergyClassifier, SpeechClassifier};
use crate::audio::wav::WavFileSource;
use crate::cli::OutputArgs;
use crate::config::{Config, SinkKind};
use crate::dialogue::history::{DialogueHistory, SharedHistory};
use crate::dialogue::responder::{EchoResponder, Responder};
use crate::dialogue::station::ResponderModule;
use crate::error::{ParleyError, Result};
use crate::output::DialogueEcho;
use crate::pipeline::error::PipelineError;
use crate::pipeline::graph::{ModuleId, PipelineGraph, PipelineHandle};
use crate::sink::station::SinkModule;
use crate::sink::{AudioSink, WavSink};
use crate::stt::station::RecognizerModule;
use crate::stt::transcriber::{MockTranscriber, Transcriber};
use crate::tts::station::SynthesisModule;
use crate::tts::synthesizer::{Synthesizer, ToneSynthesizer};
use crate::turn::station::TurnDetectorModule;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The external capabilities a conversation is assembled from.
pub struct Capabilities {
    pub source: Box<dyn AudioSource>,
    pub classifier: Box<dyn SpeechClassifier>,
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Box<dyn Responder>,
    pub synthesizer: Box<dyn Synthesizer>,
    pub sink: Box<dyn AudioSink>,
}

impl Capabilities {
    /// Deterministic stand-ins for recognition, response and synthesis.
    pub fn stand_ins(config: &Config, source: Box<dyn AudioSource>, sink: Box<dyn AudioSink>) -> Self {
        Self {
            source,
            classifier: Box::new(
                EnergyClassifier::new(config.turn.vad_threshold)
                    .with_auto_level(config.turn.auto_level),
            ),
            transcriber: Arc::new(
                MockTranscriber::new("describe").describing(config.audio.sample_rate),
            ),
            responder: Box::new(EchoResponder),
            synthesizer: Box::new(ToneSynthesizer::new(config.tts.sample_rate)),
            sink,
        }
    }
}

/// A wired but not yet started conversation graph.
pub struct Conversation {
    graph: PipelineGraph,
    source: ModuleId,
    history: SharedHistory,
}

/// Builds the dialogue graph.
///
/// With an `echo`, both sides of the conversation are also printed as they
/// are committed.
pub fn build_conversation(
    config: &Config,
    parts: Capabilities,
    echo: Option<DialogueEcho>,
) -> std::result::Result<Conversation, PipelineError> {
    let history = DialogueHistory::new(config.dialogue.system_prompt.clone())
        .with_max_turns(config.dialogue.max_turns)
        .shared();

    let mut graph = PipelineGraph::new().with_config(config.graph_config());

    let source = graph.add(SourceModule::new(parts.source).with_frame_ms(config.audio.frame_ms));
    let turn = graph.add(TurnDetectorModule::new(
        config.turn_config(),
        parts.classifier,
    ));
    let recognizer = graph.add(RecognizerModule::new(parts.transcriber));
    let responder = graph.add(ResponderModule::new(parts.responder, history.clone()));
    let synthesizer = graph.add(
        SynthesisModule::new(parts.synthesizer)
            .with_output_rate(config.tts.effective_output_rate())
            .with_queue_capacity(config.tts.queue_capacity),
    );
    let sink = graph.add(SinkModule::new(parts.sink));

    graph.subscribe(source, turn)?;
    graph.subscribe(turn, recognizer)?;
    graph.subscribe(recognizer, responder)?;
    graph.subscribe(responder, synthesizer)?;
    graph.subscribe(synthesizer, sink)?;

    if let Some(echo) = echo {
        let echo = graph.add(echo);
        graph.subscribe(recognizer, echo)?;
        graph.subscribe(responder, echo)?;
    }

    Ok(Conversation {
        graph,
        source,
        history,
    })
}

impl Conversation {
    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    /// Starts every module. Fails if any module cannot be set up.
    pub fn start(self) -> std::result::Result<(PipelineHandle, SharedHistory), PipelineError> {
        let handle = self.graph.run(self.source)?;
        Ok((handle, self.history))
    }
}

/// Applies the output options of a command to the configuration.
pub fn apply_output_args(config: &mut Config, output: &OutputArgs) {
    if let Some(sink) = output.output {
        config.output.sink = sink;
    }
    if let Some(dir) = &output.out {
        config.output.sink = SinkKind::Wav;
        config.output.directory = dir.clone();
    }
}

/// Picks the reply sink, falling back to WAV files when no speaker is available.
pub fn make_sink(config: &Config) -> Box<dyn AudioSink> {
    let wav = Box::new(WavSink::new(config.output.directory.clone()));
    match config.output.sink {
        SinkKind::Wav => wav,
        #[cfg(feature = "cpal-audio")]
        SinkKind::Speaker => crate::sink::select_sink(
            Box::new(crate::sink::SpeakerSink::new(config.output.device.clone())),
            wav,
        ),
        #[cfg(not(feature = "cpal-audio"))]
        SinkKind::Speaker => {
            tracing::warn!(
                directory = %config.output.directory.display(),
                "built without speaker support, writing replies as WAV files"
            );
            wav
        }
    }
}

fn make_echo(quiet: bool) -> Option<DialogueEcho> {
    (!quiet).then(|| DialogueEcho::new().with_color(std::io::stderr().is_terminal()))
}

fn write_transcript(history: &SharedHistory, path: &Path) -> Result<()> {
    let history = history
        .lock()
        .map_err(|_| ParleyError::Other("dialogue history lock poisoned".to_string()))?;
    history.write_json(path)?;
    tracing::info!(path = %path.display(), turns = history.len(), "wrote transcript");
    Ok(())
}

/// Run the pipeline over a WAV file until every reply has been produced.
pub fn run_file_command(
    config: Config,
    wav: &Path,
    transcript: Option<PathBuf>,
    timeout: Duration,
    quiet: bool,
) -> Result<()> {
    let source = WavFileSource::open(wav, config.audio.sample_rate)?;
    tracing::info!(
        path = %wav.display(),
        duration_ms = source.duration_ms(),
        "loaded input"
    );

    let parts = Capabilities::stand_ins(&config, Box::new(source), make_sink(&config));
    let (handle, history) = build_conversation(&config, parts, make_echo(quiet))?.start()?;

    let started = Instant::now();
    if !handle.wait_until_idle(timeout) {
        tracing::warn!(
            in_flight = handle.in_flight(),
            "pipeline still busy after {}",
            humantime::format_duration(timeout)
        );
    }
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "input processed"
    );
    handle.stop();

    if let Some(path) = transcript {
        write_transcript(&history, &path)?;
    }
    Ok(())
}

/// Talk through the microphone until Enter is pressed.
pub fn run_listen_command(
    config: Config,
    transcript: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let source = open_microphone(&config)?;
    let parts = Capabilities::stand_ins(&config, source, make_sink(&config));
    let (handle, history) = build_conversation(&config, parts, make_echo(quiet))?.start()?;

    if !quiet {
        eprintln!("Listening. Press Enter to stop.");
    }
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    handle.stop();

    if let Some(path) = transcript {
        write_transcript(&history, &path)?;
    }
    Ok(())
}

#[cfg(feature = "cpal-audio")]
fn open_microphone(config: &Config) -> Result<Box<dyn AudioSource>> {
    Ok(Box::new(CpalAudioSource::new(
        config.audio.device.as_deref(),
        config.audio.sample_rate,
    )?))
}

#[cfg(not(feature = "cpal-audio"))]
fn open_microphone(_config: &Config) -> Result<Box<dyn AudioSource>> {
    Err(ParleyError::CapabilityUnavailable {
        capability: "microphone".to_string(),
        message: "built without the cpal-audio feature; use `parley file` instead".to_string(),
    })
}
