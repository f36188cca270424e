//! Test-only helpers for constructing tool calls and workflows.

use crate::core::types::{ToolCall, Warning};
use crate::io::model::ModelTurn;
use crate::workflow::{Workflow, WorkflowNode};

/// Create a tool call with a deterministic id.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: Some(id.to_string()),
        name: name.to_string(),
        arguments,
    }
}

/// Create a node-scoped warning with deterministic fields.
pub fn warning(code: &str, node: &str) -> Warning {
    Warning::for_node(code, format!("{code} on {node}"), node)
}

/// A model turn that only calls tools.
pub fn tool_turn(calls: Vec<ToolCall>) -> ModelTurn {
    ModelTurn {
        text: None,
        tool_calls: calls,
    }
}

/// A bare text turn (triggers auto-finalize).
pub fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

/// A minimal workflow that passes both validation stages.
pub fn valid_workflow() -> Workflow {
    Workflow {
        name: "demo".to_string(),
        nodes: vec![WorkflowNode {
            name: "Start".to_string(),
            kind: "core.trigger".to_string(),
            parameters: serde_json::Value::Null,
        }],
        connections: Default::default(),
    }
}

/// Source text for [`valid_workflow`].
pub fn valid_source() -> String {
    valid_workflow().to_source().expect("serialize workflow")
}
