//! Model client abstraction for the builder conversation.
//!
//! The [`ModelClient`] trait decouples the iteration loop from the network
//! backend that actually reaches a model. The in-repo implementation is
//! [`ScriptedModelClient`], which replays recorded turns from a JSONL script
//! for deterministic runs, demos, and tests; production deployments plug in
//! their own client at this seam.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{ChatMessage, ToolCall};

/// One assistant turn: optional text plus zero or more tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    /// Tool calls that can be answered: entries without an id are dropped,
    /// since a response message cannot be correlated to them.
    pub fn identified_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .filter(|call| call.id.is_some())
            .cloned()
            .collect()
    }
}

/// Abstraction over model backends.
pub trait ModelClient {
    /// Produce the next assistant turn for the given conversation history.
    fn complete(&self, messages: &[ChatMessage]) -> Result<ModelTurn>;
}

/// Replays turns recorded as one JSON object per line.
///
/// The queue is behind a mutex only because `complete` takes `&self`; the
/// session itself is single-threaded.
#[derive(Debug)]
pub struct ScriptedModelClient {
    turns: Mutex<VecDeque<ModelTurn>>,
    total: usize,
}

impl ScriptedModelClient {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            total: turns.len(),
            turns: Mutex::new(turns.into()),
        }
    }

    /// Load a JSONL turn script. Blank lines are skipped.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))?;
        let mut turns = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let turn: ModelTurn = serde_json::from_str(line)
                .with_context(|| format!("parse script line {} of {}", number + 1, path.display()))?;
            turns.push(turn);
        }
        debug!(turns = turns.len(), path = %path.display(), "loaded model script");
        Ok(Self::new(turns))
    }
}

impl ModelClient for ScriptedModelClient {
    #[instrument(skip_all, fields(history_len = messages.len()))]
    fn complete(&self, messages: &[ChatMessage]) -> Result<ModelTurn> {
        let mut turns = self
            .turns
            .lock()
            .map_err(|_| anyhow!("model script queue poisoned"))?;
        turns
            .pop_front()
            .ok_or_else(|| anyhow!("model script exhausted after {} turns", self.total))
    }
}
