//! Incremental streaming core.
//!
//! Modules exchange update messages made of incremental units tagged ADD,
//! REVOKE or COMMIT. Each module runs in its own thread, connected to its
//! subscribers by bounded crossbeam channels for backpressure.

pub mod buffer;
pub mod error;
pub mod graph;
pub mod message;
pub mod module;
pub mod unit;
pub mod validator;

pub use buffer::TurnBuffer;
pub use error::{ErrorReporter, LogReporter, ModuleError, PipelineError};
pub use graph::{Emitter, GraphConfig, InFlight, ModuleId, PipelineGraph, PipelineHandle};
pub use message::{UpdateMessage, UpdateType};
pub use module::{Module, ModuleState, StateCell};
pub use unit::{AudioPayload, IncrementalUnit, Payload};
pub use validator::{ProtocolError, StreamValidator};
