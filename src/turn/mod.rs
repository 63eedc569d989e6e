//! Turn detection: deciding when the user has started and finished speaking.

pub mod detector;
pub mod station;

pub use detector::{TurnConfig, TurnDetector, TurnState};
pub use station::TurnDetectorModule;
