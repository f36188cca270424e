//! Structured workflow artifact produced by the DSL compiler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A parsed automation workflow: named steps plus a connection map.
///
/// Connections are stored in a `BTreeMap` so serialized snapshots stay stable
/// across runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    /// Source node name -> downstream node names.
    #[serde(default)]
    pub connections: BTreeMap<String, Vec<String>>,
}

/// One step of a workflow.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowNode {
    pub name: String,
    /// Node type identifier (e.g. `core.http_request`).
    pub kind: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl Workflow {
    /// True if there is nothing to validate (no nodes and no connections).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.connections.is_empty()
    }

    /// Canonical program text for this workflow (pretty-printed JSON with a
    /// trailing newline).
    pub fn to_source(&self) -> serde_json::Result<String> {
        let mut buf = serde_json::to_string_pretty(self)?;
        buf.push('\n');
        Ok(buf)
    }
}

pub fn empty_workflow(name: &str) -> Workflow {
    Workflow {
        name: name.to_string(),
        nodes: Vec::new(),
        connections: BTreeMap::new(),
    }
}
