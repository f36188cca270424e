//! Validation gateway between the edit loop and the compiler collaborator.
//!
//! Normalizes compiler output into `(workflow, warnings)` so the dispatcher
//! never looks at severities: validation errors from either stage are folded
//! into the warning list, because the desired behavior is agent
//! self-correction, not abort. Only a parse failure is reported separately.

use tracing::debug;

use crate::core::types::Warning;
use crate::io::compiler::{Compiler, ParseError};
use crate::workflow::Workflow;

/// A successfully parsed and validated artifact with its combined feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub workflow: Workflow,
    pub warnings: Vec<Warning>,
}

/// Parse program text and run both validation stages.
pub fn parse_and_validate<C: Compiler>(
    compiler: &C,
    source: &str,
) -> Result<ValidationOutcome, ParseError> {
    let workflow = compiler.parse(source)?;
    let warnings = combined_warnings(compiler, &workflow);
    debug!(warnings = warnings.len(), "parse and validation finished");
    Ok(ValidationOutcome { workflow, warnings })
}

/// Validate a pre-existing artifact with no parsing step.
///
/// Used once at session start to seed the pre-existing warning set; a
/// baseline with nothing to evaluate is skipped entirely.
pub fn validate_baseline<C: Compiler>(compiler: &C, workflow: &Workflow) -> Vec<Warning> {
    if workflow.is_empty() {
        debug!("baseline has no content to evaluate, skipping");
        return Vec::new();
    }
    let warnings = combined_warnings(compiler, workflow);
    debug!(warnings = warnings.len(), "baseline validation finished");
    warnings
}

/// Structure-stage findings first, then artifact-schema findings, with
/// errors ahead of warnings within each stage.
fn combined_warnings<C: Compiler>(compiler: &C, workflow: &Workflow) -> Vec<Warning> {
    let mut combined = compiler.validate_structure(workflow).into_combined();
    combined.extend(compiler.validate_workflow_json(workflow).into_combined());
    combined
}
