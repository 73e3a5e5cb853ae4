//! Events the session emits towards the renderer

use super::cancel::Token;
use crate::graph::{ElementId, TaskKind};
use serde::Serialize;

/// What a renderer needs to draw one task of a branch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskParams {
    pub task: ElementId,
    pub kind: TaskKind,
    pub label: String,
    pub input: ElementId,
    pub outputs: Vec<ElementId>,
}

/// Number of loading slots attached to one input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceholderSlots {
    pub input: ElementId,
    pub count: usize,
}

/// An event fired when the session changes the lineage or an element's display state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LineageEvent {
    /// A new unconfirmed branch is shown
    PreviewChanged {
        tasks: Vec<TaskParams>,
        attributes: Vec<String>,
    },
    /// The unconfirmed branch became permanent history
    PreviewConfirmed {
        tasks: Vec<TaskParams>,
        attributes: Vec<String>,
    },
    /// Elements were added to or removed from the graph
    GraphChanged,
    /// Loading slots were attached while an Apply is in flight
    PlaceholdersAttached {
        token: Token,
        slots: Vec<PlaceholderSlots>,
    },
    LabelChanged {
        id: ElementId,
        primary: String,
        secondary: String,
    },
    SizeChanged {
        id: ElementId,
        size: u64,
        /// Size of the root, for proportional display
        reference: Option<u64>,
    },
    SelectionChanged {
        id: ElementId,
        selected: bool,
    },
    /// An Apply failed; its placeholders are gone
    OperationFailed { token: Token, message: String },
}
