//! Editing session: intents in, lineage events out
//!
//! The [`PreviewController`] owns the preview-then-commit cycle. Each Apply is stamped
//! with a [`Token`]; results are applied only while their token is current.

mod cancel;
mod config;
mod controller;
mod events;
mod intent;
#[cfg(test)]
mod integration_tests;
mod job;
mod sink;

pub use cancel::{Token, TokenSource};
pub use config::ControllerConfig;
pub use controller::{
    ApplyStatus, Dispatched, OutputSlot, PreviewController, SessionError, SessionResult,
    SessionState,
};
pub use events::{LineageEvent, PlaceholderSlots, TaskParams};
pub use intent::{ApplyRequest, FilterBin, Intent};
pub use job::{InputOutputs, JobInput, MaterializeJob, MaterializeOutcome};
pub use sink::{ChannelSink, CollectingSink, EventSink};
