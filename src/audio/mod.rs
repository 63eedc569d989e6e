//! Audio input, output, speech classification and format conversion.

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod playback;
pub mod resample;
pub mod source;
pub mod station;
pub mod vad;
pub mod wav;

pub use source::{AudioSource, FrameSplitter, MockAudioSource};
pub use station::SourceModule;
pub use vad::{EnergyClassifier, SpeechClassifier, calculate_rms};
pub use wav::{WavFileSource, write_wav};
