//! Iteration controller: the top-level build loop.
//!
//! Invokes the model with the full message history, dispatches its tool
//! calls, and decides continue/stop/fail. When the model stops calling tools
//! without an explicit validation, the auto-finalize fallback runs one last
//! validation pass and either concludes the session or synthesizes a
//! corrective exchange. Iteration and finalize-attempt ceilings are the sole
//! liveness guarantee.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::document::{Document, WORKFLOW_PATH};
use crate::core::types::{CancelFlag, ChatMessage, ToolCall, ToolResponse, Warning};
use crate::core::warnings::{TrackedWarning, WarningLedger};
use crate::dispatch::{absorb_warnings, dispatch_tool_calls, render_feedback};
use crate::gateway;
use crate::io::compiler::Compiler;
use crate::io::config::BuilderConfig;
use crate::io::events::{BuildEvent, EventSink};
use crate::io::invoker::ToolInvoker;
use crate::io::model::{ModelClient, ModelTurn};
use crate::io::prompt::{InstructionsInput, PromptBuilder, system_prompt};
use crate::io::session_log::{IterationWriteRequest, SessionSummary, write_iteration, write_summary};
use crate::workflow::Workflow;

/// Shared mutable state for one build session, passed by reference through
/// the dispatcher and the iteration loop.
#[derive(Debug, Default)]
pub struct SessionState {
    pub document: Document,
    pub ledger: WarningLedger,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A pre-existing artifact supplied before editing begins.
#[derive(Debug, Clone)]
pub struct Baseline {
    /// Program text that seeds the document buffer.
    pub source: String,
    /// The structured artifact, validated without a parsing step.
    pub workflow: Workflow,
}

/// What the caller wants built.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Identifier for session logs (one directory per session).
    pub session_id: String,
    /// The user's instructions for the workflow.
    pub instructions: String,
    pub baseline: Option<Baseline>,
}

/// Why the session ended. Terminal conditions are values, not faults.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionStop {
    /// Validation reported no new warnings.
    Ready { workflow: Workflow },
    /// The model-turn ceiling was reached without readiness.
    IterationLimit { max_iterations: u32 },
    /// Auto-finalize kept producing fresh feedback past its ceiling.
    FinalizeLimit { max_attempts: u32 },
    /// The external cancellation signal was observed.
    Cancelled,
}

impl SessionStop {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStop::Ready { .. } => "ready",
            SessionStop::IterationLimit { .. } => "iteration_limit",
            SessionStop::FinalizeLimit { .. } => "finalize_limit",
            SessionStop::Cancelled => "cancelled",
        }
    }
}

/// Summary of one session run.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Model turns consumed.
    pub iterations: u32,
    pub stop: SessionStop,
    /// Warning occurrence/resolution timeline from the ledger.
    pub timeline: Vec<TrackedWarning>,
}

/// What one auto-finalize pass decided.
enum Finalize {
    Done(Workflow),
    Corrective,
    Cancelled,
}

/// Drive the build conversation until the artifact is ready, a ceiling is
/// hit, or the caller cancels.
#[instrument(skip_all, fields(session_id = %request.session_id))]
pub fn run_session<M, C, T, S>(
    config: &BuilderConfig,
    model: &M,
    compiler: &C,
    invoker: &T,
    events: &S,
    request: &BuildRequest,
    cancel: &CancelFlag,
) -> Result<SessionOutcome>
where
    M: ModelClient,
    C: Compiler,
    T: ToolInvoker,
    S: EventSink,
{
    config.validate()?;

    let mut state = SessionState::new();
    if let Some(baseline) = &request.baseline {
        state.document = Document::with_buffer(baseline.source.clone());
        let baseline_warnings = gateway::validate_baseline(compiler, &baseline.workflow);
        // Tagged but not marked seen: they surface once, labelled
        // [pre-existing], then deduplicate like any other key.
        state.ledger.mark_pre_existing(&baseline_warnings);
        debug!(warnings = baseline_warnings.len(), "baseline validated");
    }

    let prompts = PromptBuilder::new(config.feedback_budget_bytes);
    let mut messages = vec![
        ChatMessage::system(system_prompt()),
        ChatMessage::user(prompts.build_instructions(&InstructionsInput {
            instructions: request.instructions.clone(),
            baseline_source: request.baseline.as_ref().map(|b| b.source.clone()),
        })),
    ];

    let mut iteration: u32 = 0;
    let mut finalize_attempts: u32 = 0;

    let stop = loop {
        if cancel.is_cancelled() {
            break SessionStop::Cancelled;
        }
        if iteration >= config.max_iterations {
            warn!(max_iterations = config.max_iterations, "iteration ceiling reached");
            break SessionStop::IterationLimit {
                max_iterations: config.max_iterations,
            };
        }
        iteration += 1;

        let turn = model
            .complete(&messages)
            .with_context(|| format!("model call failed at iteration {iteration}"))?;
        if let Some(text) = turn.text.as_deref().filter(|t| !t.trim().is_empty()) {
            events.emit(BuildEvent::Message {
                text: text.to_string(),
            });
        }

        let calls = turn.identified_calls();
        if calls.is_empty() {
            match auto_finalize(
                &mut state,
                compiler,
                events,
                config,
                iteration,
                finalize_attempts,
                &mut messages,
                cancel,
            ) {
                Finalize::Done(workflow) => {
                    log_iteration(config, request, iteration, &turn, &[], &[], &state)?;
                    break SessionStop::Ready { workflow };
                }
                Finalize::Cancelled => break SessionStop::Cancelled,
                Finalize::Corrective => {
                    finalize_attempts += 1;
                    log_iteration(config, request, iteration, &turn, &[], &[], &state)?;
                    if finalize_attempts > config.max_finalize_attempts {
                        warn!(
                            max_attempts = config.max_finalize_attempts,
                            "finalize ceiling reached"
                        );
                        break SessionStop::FinalizeLimit {
                            max_attempts: config.max_finalize_attempts,
                        };
                    }
                    continue;
                }
            }
        }

        messages.push(ChatMessage::assistant(turn.text.clone(), calls.clone()));
        let dispatched = dispatch_tool_calls(
            &mut state, compiler, invoker, events, config, iteration, &calls, cancel,
        );
        for response in &dispatched.responses {
            messages.push(ChatMessage::tool(
                response.call_id.clone(),
                response.content.clone(),
            ));
        }
        log_iteration(
            config,
            request,
            iteration,
            &turn,
            &dispatched.responses,
            &dispatched.new_warnings,
            &state,
        )?;

        debug!(
            iteration,
            has_unvalidated_edits = ?dispatched.state.has_unvalidated_edits,
            responses = dispatched.responses.len(),
            "turn dispatched"
        );
        if dispatched.cancelled {
            break SessionStop::Cancelled;
        }
        if dispatched.state.ready
            && let Some(workflow) = dispatched.ready_workflow
        {
            break SessionStop::Ready { workflow };
        }
    };

    info!(iterations = iteration, stop = stop.label(), "session finished");
    let outcome = SessionOutcome {
        iterations: iteration,
        stop,
        timeline: state.ledger.timeline(),
    };
    if let Some(log_root) = &config.log_root {
        write_summary(
            log_root,
            &request.session_id,
            &SessionSummary {
                stop: outcome.stop.label().to_string(),
                iterations: outcome.iterations,
                timeline: outcome.timeline.clone(),
            },
        )?;
    }
    Ok(outcome)
}

/// Validate the current document after a bare text turn.
///
/// No warnings, or only previously seen ones, concludes the session with no
/// extra feedback. Anything else synthesizes a corrective exchange shaped as
/// if the model itself had just asked to validate, keeping the conversation
/// structure consistent for the next turn.
#[allow(clippy::too_many_arguments)]
fn auto_finalize<C: Compiler, S: EventSink>(
    state: &mut SessionState,
    compiler: &C,
    events: &S,
    config: &BuilderConfig,
    iteration: u32,
    attempt: u32,
    messages: &mut Vec<ChatMessage>,
    cancel: &CancelFlag,
) -> Finalize {
    if cancel.is_cancelled() {
        return Finalize::Cancelled;
    }

    let Some(buffer) = state.document.buffer().map(str::to_string) else {
        debug!("auto-finalize with no document");
        let feedback = "no document exists yet; create workflow.json with the create tool, then validate";
        push_synthetic_validation(messages, attempt, feedback);
        return Finalize::Corrective;
    };

    match gateway::parse_and_validate(compiler, &buffer) {
        Ok(validated) => {
            events.emit(BuildEvent::WorkflowUpdated {
                workflow: validated.workflow.clone(),
            });
            let new = absorb_warnings(state, &validated.warnings, iteration);
            if new.is_empty() {
                debug!("auto-finalize converged");
                return Finalize::Done(validated.workflow);
            }
            let feedback = render_feedback(state, config, None, &new);
            push_synthetic_validation(messages, attempt, &feedback);
            Finalize::Corrective
        }
        Err(parse) => {
            let feedback = render_feedback(state, config, Some(parse.message), &[]);
            push_synthetic_validation(messages, attempt, &feedback);
            Finalize::Corrective
        }
    }
}

/// Append an assistant validate call plus its tool response, as if the model
/// had requested the validation itself.
fn push_synthetic_validation(messages: &mut Vec<ChatMessage>, attempt: u32, feedback: &str) {
    let call_id = format!("auto_validate_{attempt}");
    messages.push(ChatMessage::assistant(
        None,
        vec![ToolCall {
            id: Some(call_id.clone()),
            name: "validate".to_string(),
            arguments: serde_json::json!({ "path": WORKFLOW_PATH }),
        }],
    ));
    messages.push(ChatMessage::tool(call_id, feedback));
}

fn log_iteration(
    config: &BuilderConfig,
    request: &BuildRequest,
    iteration: u32,
    turn: &ModelTurn,
    responses: &[ToolResponse],
    new_warnings: &[Warning],
    state: &SessionState,
) -> Result<()> {
    let Some(log_root) = &config.log_root else {
        return Ok(());
    };
    write_iteration(&IterationWriteRequest {
        root: log_root,
        session_id: &request.session_id,
        iter: iteration,
        turn,
        responses,
        document: state.document.buffer(),
        new_warnings,
    })?;
    Ok(())
}
