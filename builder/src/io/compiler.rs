//! Compiler abstraction for the workflow DSL.
//!
//! The [`Compiler`] trait decouples the edit loop from the actual DSL
//! implementation. [`JsonWorkflowCompiler`] is the reference backend: the
//! program text is the workflow's JSON form, checked against a JSON Schema
//! (Draft 2020-12) plus semantic invariants the schema cannot express.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{Validation, Warning};
use crate::workflow::Workflow;

const WORKFLOW_SCHEMA: &str = include_str!("../../schemas/workflow.schema.json");

/// The source text could not be turned into a structured workflow at all.
///
/// Parse failures are recoverable: they become corrective feedback for the
/// model, never an abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workflow source failed to parse: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Abstraction over workflow DSL backends.
pub trait Compiler {
    /// Turn program text into a structured workflow.
    fn parse(&self, source: &str) -> Result<Workflow, ParseError>;

    /// Check the structural graph (node identities, connection endpoints).
    fn validate_structure(&self, workflow: &Workflow) -> Validation;

    /// Check the serialized artifact against the workflow schema.
    fn validate_workflow_json(&self, workflow: &Workflow) -> Validation;
}

/// Reference compiler for the JSON workflow format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWorkflowCompiler;

static SCHEMA_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(WORKFLOW_SCHEMA).expect("bundled workflow schema should be valid JSON");
    validator_for(&schema).expect("bundled workflow schema should compile")
});

impl Compiler for JsonWorkflowCompiler {
    fn parse(&self, source: &str) -> Result<Workflow, ParseError> {
        serde_json::from_str(source).map_err(|err| ParseError {
            message: err.to_string(),
        })
    }

    fn validate_structure(&self, workflow: &Workflow) -> Validation {
        let mut validation = Validation::default();

        if workflow.nodes.is_empty() {
            validation
                .warnings
                .push(Warning::new("empty_workflow", "the workflow has no nodes"));
        }
        if workflow.name.trim().is_empty() {
            validation.warnings.push(Warning::new(
                "empty_workflow_name",
                "the workflow has no name",
            ));
        }

        let mut names = HashSet::new();
        for node in &workflow.nodes {
            if !names.insert(node.name.as_str()) {
                validation.errors.push(Warning::for_node(
                    "duplicate_node_name",
                    format!("node name '{}' is used more than once", node.name),
                    node.name.clone(),
                ));
            }
            if node.kind.trim().is_empty() {
                validation.errors.push(Warning::for_node(
                    "missing_node_kind",
                    format!("node '{}' has no kind", node.name),
                    node.name.clone(),
                ));
            }
        }

        let mut connected: HashSet<&str> = HashSet::new();
        for (source, targets) in &workflow.connections {
            if names.contains(source.as_str()) {
                connected.insert(source.as_str());
            } else {
                validation.errors.push(Warning::for_node(
                    "unknown_connection_source",
                    format!("connection source '{source}' is not a node"),
                    source.clone(),
                ));
            }
            for target in targets {
                if names.contains(target.as_str()) {
                    connected.insert(target.as_str());
                } else {
                    validation.errors.push(Warning::for_node(
                        "unknown_connection_target",
                        format!("connection target '{target}' is not a node"),
                        target.clone(),
                    ));
                }
            }
        }

        if workflow.nodes.len() > 1 {
            for node in &workflow.nodes {
                if !connected.contains(node.name.as_str()) {
                    validation.warnings.push(Warning::for_node(
                        "unconnected_node",
                        format!("node '{}' has no connections", node.name),
                        node.name.clone(),
                    ));
                }
            }
        }

        debug!(
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            "structure validation finished"
        );
        validation
    }

    fn validate_workflow_json(&self, workflow: &Workflow) -> Validation {
        let mut validation = Validation::default();
        let instance = match serde_json::to_value(workflow) {
            Ok(value) => value,
            Err(err) => {
                validation.errors.push(Warning::new(
                    "schema",
                    format!("workflow could not be serialized: {err}"),
                ));
                return validation;
            }
        };

        for err in SCHEMA_VALIDATOR.iter_errors(&instance) {
            let mut warning = Warning::new("schema", err.to_string());
            warning.parameter_path = Some(err.instance_path().to_string());
            validation.errors.push(warning);
        }
        validation
    }
}
