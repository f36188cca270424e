//! Shared deterministic types for the builder core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// One tool call requested by the model in a single turn.
///
/// The `id` correlates progress events and response messages; calls without
/// an id cannot be answered and are dropped before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// An exact-match edit: `old` must occur exactly once in the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub old: String,
    pub new: String,
}

/// Message roles in the builder conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One unit of conversation history sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Assistant turn carrying tool calls (content may be empty).
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool response correlated to a call id.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Textual result of one tool call, fed back into the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub call_id: String,
    pub content: String,
}

impl ToolResponse {
    pub fn new(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
        }
    }
}

/// A validation complaint about the workflow under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_path: Option<String>,
}

impl Warning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            node_name: None,
            parameter_path: None,
        }
    }

    pub fn for_node(
        code: impl Into<String>,
        message: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            node_name: Some(node_name.into()),
            ..Self::new(code, message)
        }
    }

    /// Deduplication identity: `code|node_name|parameter_path`.
    ///
    /// The message text is deliberately excluded so a reworded warning does
    /// not defeat the seen-set.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.code,
            self.node_name.as_deref().unwrap_or(""),
            self.parameter_path.as_deref().unwrap_or("")
        )
    }
}

/// Errors and warnings returned by one compiler validation stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<Warning>,
    pub warnings: Vec<Warning>,
}

impl Validation {
    /// Fold both severities into one feedback list, errors first.
    ///
    /// Validation problems drive agent self-correction instead of aborting,
    /// so downstream code treats everything here as a warning.
    pub fn into_combined(self) -> Vec<Warning> {
        let mut combined = self.errors;
        combined.extend(self.warnings);
        combined
    }
}

/// Per-iteration dispatch status, recreated for every model turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationState {
    /// Iteration number (1-indexed).
    pub iteration: u32,
    /// `Some(true)` once an edit landed without a follow-up validation,
    /// `Some(false)` after `create`/`validate`, `None` when nothing this
    /// iteration touched the document.
    pub has_unvalidated_edits: Option<bool>,
    /// Set when a validate call reported no new warnings.
    pub ready: bool,
}

impl IterationState {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            has_unvalidated_edits: None,
            ready: false,
        }
    }
}

/// Cooperative cancellation signal checked at every suspension point.
///
/// Cloning shares the underlying flag, so a caller can cancel a session it
/// handed off to the loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelFlag, ChatMessage, Warning};

    /// Message text must not affect the dedup key.
    #[test]
    fn warning_key_ignores_message() {
        let a = Warning::for_node("W1", "first wording", "Fetch");
        let b = Warning::for_node("W1", "second wording", "Fetch");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn warning_key_distinguishes_parameter_path() {
        let mut a = Warning::for_node("W1", "m", "Fetch");
        let mut b = a.clone();
        a.parameter_path = Some("url".to_string());
        b.parameter_path = Some("method".to_string());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn tool_message_serializes_without_empty_fields() {
        let msg = ChatMessage::tool("call-1", "ok");
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("call-1"));
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
