//! Beat-timed event scheduling with lookahead cueing and parameter
//! automation.

pub mod automation;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod output;
pub mod project;
pub mod timing;

pub use automation::{AutomationStore, Curve, ParamId, Segment};
pub use config::Config;
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{Error, ProjectError, Result};
pub use events::{Event, EventKind, ScheduledEvent};
pub use output::{AutomatingSink, EventSink, RingSink};
pub use project::{Project, SequenceData};
