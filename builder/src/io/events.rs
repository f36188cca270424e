//! Progress event stream produced for the caller.
//!
//! Operations return their results and emit an ordered, append-only event
//! stream through an explicit sink; nothing suspends mid-computation. A UI
//! can bridge the sink onto a channel and render progressively.

use std::sync::mpsc;

use serde::Serialize;

use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

/// One progress event, ordered per iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    /// Lifecycle of one tool call, correlated by the call id.
    ToolProgress {
        tool: String,
        call_id: String,
        status: ToolStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A fresh artifact snapshot after a successful parse or validation.
    WorkflowUpdated { workflow: Workflow },
    /// Plain text produced by the model.
    Message { text: String },
}

/// Receives the ordered event stream of a session.
pub trait EventSink {
    fn emit(&self, event: BuildEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: BuildEvent) {}
}

/// Forwards events to an mpsc channel; a disconnected receiver is ignored
/// so a departed consumer cannot fail the session.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<BuildEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<BuildEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: BuildEvent) {
        let _ = self.tx.send(event);
    }
}
