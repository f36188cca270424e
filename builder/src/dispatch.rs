//! Tool dispatch for one model turn.
//!
//! Routes each requested tool call to the document store, the validation
//! gateway, or the generic tool invoker, in the order the model issued them.
//! Every failure here is recoverable: it becomes a textual tool response the
//! model can act on, never a fault that unwinds the session.

use tracing::{debug, warn};

use crate::core::document::EditError;
use crate::core::tools::{
    CreateArgs, InsertArgs, ReplaceArgs, ToolKind, ValidateArgs, ViewArgs, decode_args,
    decode_batch_args,
};
use crate::core::types::{CancelFlag, IterationState, Replacement, ToolCall, ToolResponse, Warning};
use crate::gateway;
use crate::io::compiler::Compiler;
use crate::io::config::BuilderConfig;
use crate::io::events::{BuildEvent, EventSink, ToolStatus};
use crate::io::invoker::ToolInvoker;
use crate::io::prompt::{FeedbackInput, FeedbackWarning, PromptBuilder};
use crate::session::SessionState;
use crate::workflow::Workflow;

/// What one turn's dispatch produced.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub state: IterationState,
    pub responses: Vec<ToolResponse>,
    /// The validated artifact, when a validate call reported no new warnings.
    pub ready_workflow: Option<Workflow>,
    /// Warnings first shown to the model during this turn.
    pub new_warnings: Vec<Warning>,
    /// Dispatch stopped early because the cancel flag was set.
    pub cancelled: bool,
}

/// Effect of one call on the unvalidated-edits flag.
enum FlagEffect {
    Keep,
    Clear,
    MarkDirty,
}

/// Result of executing a single call, before event/response bookkeeping.
struct CallResult {
    ok: bool,
    content: String,
    /// Fresh artifact snapshot to stream, when the call produced one.
    workflow: Option<Workflow>,
    flag: FlagEffect,
    ready: bool,
    /// Warnings first shown to the model by this call.
    new_warnings: Vec<Warning>,
}

impl CallResult {
    fn error(content: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: content.into(),
            workflow: None,
            flag: FlagEffect::Keep,
            ready: false,
            new_warnings: Vec::new(),
        }
    }

    fn success(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
            workflow: None,
            flag: FlagEffect::Keep,
            ready: false,
            new_warnings: Vec::new(),
        }
    }
}

/// Execute one turn's tool calls in order.
///
/// Readiness short-circuits the remaining calls of the turn; cancellation is
/// checked before every call so no further edits land after the signal.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_tool_calls<C: Compiler, T: ToolInvoker, S: EventSink>(
    state: &mut SessionState,
    compiler: &C,
    invoker: &T,
    events: &S,
    config: &BuilderConfig,
    iteration: u32,
    calls: &[ToolCall],
    cancel: &CancelFlag,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome {
        state: IterationState::new(iteration),
        responses: Vec::new(),
        ready_workflow: None,
        new_warnings: Vec::new(),
        cancelled: false,
    };

    for call in calls {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        let Some(call_id) = call.id.clone() else {
            // A response message cannot be correlated without an id.
            warn!(tool = %call.name, "dropping tool call without id");
            continue;
        };

        events.emit(BuildEvent::ToolProgress {
            tool: call.name.clone(),
            call_id: call_id.clone(),
            status: ToolStatus::Running,
            error: None,
        });

        let result = run_call(state, compiler, invoker, config, iteration, call);

        if let Some(workflow) = &result.workflow {
            events.emit(BuildEvent::WorkflowUpdated {
                workflow: workflow.clone(),
            });
        }
        events.emit(BuildEvent::ToolProgress {
            tool: call.name.clone(),
            call_id: call_id.clone(),
            status: if result.ok {
                ToolStatus::Completed
            } else {
                ToolStatus::Error
            },
            error: (!result.ok).then(|| first_line(&result.content)),
        });
        outcome.responses.push(ToolResponse::new(call_id, result.content));
        outcome.new_warnings.extend(result.new_warnings);

        match result.flag {
            FlagEffect::Keep => {}
            FlagEffect::Clear => outcome.state.has_unvalidated_edits = Some(false),
            FlagEffect::MarkDirty => outcome.state.has_unvalidated_edits = Some(true),
        }

        if result.ready {
            outcome.state.ready = true;
            outcome.ready_workflow = result.workflow;
            debug!(iteration, "readiness reached, skipping remaining calls");
            break;
        }
    }

    outcome
}

fn run_call<C: Compiler, T: ToolInvoker>(
    state: &mut SessionState,
    compiler: &C,
    invoker: &T,
    config: &BuilderConfig,
    iteration: u32,
    call: &ToolCall,
) -> CallResult {
    match ToolKind::from_name(&call.name) {
        ToolKind::View => match decode_args::<ViewArgs>(call) {
            Ok(args) => handle_view(state, &args),
            Err(message) => CallResult::error(message),
        },
        ToolKind::Create => match decode_args::<CreateArgs>(call) {
            Ok(args) => handle_create(state, compiler, config, iteration, &args),
            Err(message) => CallResult::error(message),
        },
        ToolKind::Replace => match decode_args::<ReplaceArgs>(call) {
            Ok(args) => handle_replace(state, compiler, &args),
            Err(message) => CallResult::error(message),
        },
        ToolKind::Insert => match decode_args::<InsertArgs>(call) {
            Ok(args) => handle_insert(state, compiler, &args),
            Err(message) => CallResult::error(message),
        },
        ToolKind::BatchReplace => match decode_batch_args(call) {
            Ok(replacements) => handle_batch(state, compiler, &replacements),
            Err(message) => CallResult::error(message),
        },
        ToolKind::Validate => match decode_args::<ValidateArgs>(call) {
            Ok(args) => handle_validate(state, compiler, config, iteration, &args),
            Err(message) => CallResult::error(message),
        },
        ToolKind::Other => handle_generic(invoker, call),
    }
}

fn handle_view(state: &SessionState, args: &ViewArgs) -> CallResult {
    if let Err(err) = state.document.check_path(&args.path) {
        return CallResult::error(err.to_string());
    }
    match state.document.view(args.range) {
        Ok(content) => CallResult::success(content),
        Err(err) => CallResult::error(err.to_string()),
    }
}

/// `create` immediately validates the fresh buffer so the model learns about
/// problems in the same response that confirms the write.
fn handle_create<C: Compiler>(
    state: &mut SessionState,
    compiler: &C,
    config: &BuilderConfig,
    iteration: u32,
    args: &CreateArgs,
) -> CallResult {
    if let Err(err) = state.document.create(&args.path, args.text.clone()) {
        return CallResult::error(err.to_string());
    }
    let lines = args.text.lines().count();
    let confirmation = format!("created {} ({lines} lines)", args.path);

    let buffer = args.text.as_str();
    match gateway::parse_and_validate(compiler, buffer) {
        Ok(validated) => {
            let new = absorb_warnings(state, &validated.warnings, iteration);
            let content = if new.is_empty() {
                format!("{confirmation}\nvalidation found no new problems")
            } else {
                let feedback = render_feedback(state, config, None, &new);
                format!("{confirmation}\n{feedback}")
            };
            CallResult {
                ok: true,
                content,
                workflow: Some(validated.workflow),
                flag: FlagEffect::Clear,
                ready: false,
                new_warnings: new,
            }
        }
        Err(parse) => CallResult {
            ok: true,
            content: format!("{confirmation}\nthe document does not parse yet: {}", parse.message),
            workflow: None,
            flag: FlagEffect::Clear,
            ready: false,
            new_warnings: Vec::new(),
        },
    }
}

fn handle_replace<C: Compiler>(
    state: &mut SessionState,
    compiler: &C,
    args: &ReplaceArgs,
) -> CallResult {
    if let Err(err) = state.document.check_path(&args.path) {
        return CallResult::error(err.to_string());
    }
    match state.document.replace(&args.old, &args.new) {
        Ok(()) => edited(state, compiler, "replaced 1 occurrence".to_string()),
        Err(err) => CallResult::error(err.to_string()),
    }
}

fn handle_insert<C: Compiler>(
    state: &mut SessionState,
    compiler: &C,
    args: &InsertArgs,
) -> CallResult {
    if let Err(err) = state.document.check_path(&args.path) {
        return CallResult::error(err.to_string());
    }
    match state.document.insert(args.line, &args.text) {
        Ok(()) => edited(
            state,
            compiler,
            format!("inserted 1 line after line {}", args.line),
        ),
        Err(err) => CallResult::error(err.to_string()),
    }
}

fn handle_batch<C: Compiler>(
    state: &mut SessionState,
    compiler: &C,
    replacements: &[Replacement],
) -> CallResult {
    match state.document.batch_replace(replacements) {
        Ok(applied) => edited(state, compiler, format!("applied {applied} replacements")),
        Err(err) => CallResult::error(err.to_string()),
    }
}

/// Common tail for successful edits: a best-effort preview parse gives the
/// model progressive feedback without failing the tool call.
fn edited<C: Compiler>(state: &SessionState, compiler: &C, confirmation: String) -> CallResult {
    let buffer = state.document.buffer().unwrap_or_default();
    match compiler.parse(buffer) {
        Ok(workflow) => CallResult {
            ok: true,
            content: confirmation,
            workflow: Some(workflow),
            flag: FlagEffect::MarkDirty,
            ready: false,
            new_warnings: Vec::new(),
        },
        Err(parse) => CallResult {
            ok: true,
            content: format!(
                "{confirmation}\nnote: the document does not currently parse: {}",
                parse.message
            ),
            workflow: None,
            flag: FlagEffect::MarkDirty,
            ready: false,
            new_warnings: Vec::new(),
        },
    }
}

fn handle_validate<C: Compiler>(
    state: &mut SessionState,
    compiler: &C,
    config: &BuilderConfig,
    iteration: u32,
    args: &ValidateArgs,
) -> CallResult {
    if let Err(err) = state.document.check_path(&args.path) {
        return CallResult::error(err.to_string());
    }
    let Some(buffer) = state.document.buffer().map(str::to_string) else {
        return CallResult::error(
            EditError::FileNotFound {
                path: args.path.clone(),
            }
            .to_string(),
        );
    };

    match gateway::parse_and_validate(compiler, &buffer) {
        Ok(validated) => {
            let converged = state.ledger.all_seen(&validated.warnings);
            let new = absorb_warnings(state, &validated.warnings, iteration);
            if converged {
                // Zero warnings or only previously shown ones: either way the
                // artifact is ready, since repeating known complaints changes
                // nothing.
                let content = if validated.warnings.is_empty() {
                    "validation passed; the workflow is ready".to_string()
                } else {
                    "no new warnings; the workflow is ready (remaining warnings were already reported)"
                        .to_string()
                };
                CallResult {
                    ok: true,
                    content,
                    workflow: Some(validated.workflow),
                    flag: FlagEffect::Clear,
                    ready: true,
                    new_warnings: Vec::new(),
                }
            } else {
                let content = render_feedback(state, config, None, &new);
                CallResult {
                    ok: true,
                    content,
                    workflow: Some(validated.workflow),
                    flag: FlagEffect::Clear,
                    ready: false,
                    new_warnings: new,
                }
            }
        }
        Err(parse) => {
            let content = render_feedback(state, config, Some(parse.message), &[]);
            CallResult {
                ok: false,
                content,
                workflow: None,
                flag: FlagEffect::Clear,
                ready: false,
                new_warnings: Vec::new(),
            }
        }
    }
}

fn handle_generic<T: ToolInvoker>(invoker: &T, call: &ToolCall) -> CallResult {
    match invoker.invoke(call) {
        Ok(content) => CallResult::success(content),
        Err(err) => CallResult::error(format!("tool '{}' failed: {err:#}", call.name)),
    }
}

/// Run a validation result through the ledger: track occurrences, resolve
/// vanished keys, mark everything seen, and return the warnings that are new
/// this time.
pub(crate) fn absorb_warnings(
    state: &mut SessionState,
    current: &[Warning],
    iteration: u32,
) -> Vec<Warning> {
    let new: Vec<Warning> = state
        .ledger
        .filter_new(current)
        .into_iter()
        .cloned()
        .collect();
    for warning in current {
        state.ledger.record(warning, iteration);
    }
    state.ledger.update_resolution_status(current, iteration);
    state.ledger.mark_seen(current);
    new
}

pub(crate) fn render_feedback(
    state: &SessionState,
    config: &BuilderConfig,
    parse_error: Option<String>,
    new: &[Warning],
) -> String {
    let warnings = new
        .iter()
        .map(|warning| FeedbackWarning::new(warning, state.ledger.is_pre_existing(warning)))
        .collect();
    PromptBuilder::new(config.feedback_budget_bytes).build_feedback(&FeedbackInput {
        parse_error,
        warnings,
    })
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::dispatch_tool_calls;
    use crate::core::document::WORKFLOW_PATH;
    use crate::core::types::{CancelFlag, ToolCall};
    use crate::io::compiler::JsonWorkflowCompiler;
    use crate::io::config::BuilderConfig;
    use crate::io::events::{BuildEvent, EventSink, ToolStatus};
    use crate::io::invoker::CommandToolInvoker;
    use crate::session::SessionState;
    use std::cell::RefCell;

    #[derive(Default)]
    struct CollectSink {
        events: RefCell<Vec<BuildEvent>>,
    }

    impl EventSink for CollectSink {
        fn emit(&self, event: BuildEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: Some(id.to_string()),
            name: name.to_string(),
            arguments,
        }
    }

    fn source_with_unnamed_workflow() -> String {
        "{\"name\": \"\", \"nodes\": [{\"name\": \"Start\", \"kind\": \"core.trigger\"}], \"connections\": {}}"
            .to_string()
    }

    fn dispatch(
        state: &mut SessionState,
        calls: &[ToolCall],
    ) -> (super::DispatchOutcome, Vec<BuildEvent>) {
        let sink = CollectSink::default();
        let outcome = dispatch_tool_calls(
            state,
            &JsonWorkflowCompiler,
            &CommandToolInvoker::empty(),
            &sink,
            &BuilderConfig::default(),
            1,
            calls,
            &CancelFlag::new(),
        );
        (outcome, sink.events.into_inner())
    }

    #[test]
    fn create_validates_and_folds_feedback_into_one_response() {
        let mut state = SessionState::new();
        let (outcome, events) = dispatch(
            &mut state,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": source_with_unnamed_workflow()}),
            )],
        );

        assert_eq!(outcome.responses.len(), 1);
        let content = &outcome.responses[0].content;
        assert!(content.contains("created workflow.json"));
        assert!(content.contains("empty_workflow_name"));
        assert_eq!(outcome.state.has_unvalidated_edits, Some(false));
        assert!(!outcome.state.ready);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, BuildEvent::WorkflowUpdated { .. }))
        );
    }

    /// Warnings surfaced by create's auto-validation count as shown: an
    /// unchanged document then converges on the next validate.
    #[test]
    fn create_feedback_counts_as_seen_for_convergence() {
        let mut state = SessionState::new();
        dispatch(
            &mut state,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": source_with_unnamed_workflow()}),
            )],
        );

        let (outcome, _) = dispatch(
            &mut state,
            &[call("c2", "validate", serde_json::json!({"path": WORKFLOW_PATH}))],
        );
        assert!(outcome.state.ready, "converged validation should be ready");
        assert!(outcome.responses[0].content.contains("already reported"));
    }

    #[test]
    fn edits_mark_unvalidated_and_validate_clears() {
        let mut state = SessionState::new();
        dispatch(
            &mut state,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": "{\"name\": \"demo\", \"nodes\": []}"}),
            )],
        );

        let (outcome, _) = dispatch(
            &mut state,
            &[call(
                "c2",
                "replace",
                serde_json::json!({"path": WORKFLOW_PATH, "old": "demo", "new": "renamed"}),
            )],
        );
        assert_eq!(outcome.state.has_unvalidated_edits, Some(true));

        let (outcome, _) = dispatch(
            &mut state,
            &[call("c3", "validate", serde_json::json!({"path": WORKFLOW_PATH}))],
        );
        assert_eq!(outcome.state.has_unvalidated_edits, Some(false));
    }

    #[test]
    fn readiness_short_circuits_remaining_calls() {
        let mut state = SessionState::new();
        dispatch(
            &mut state,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": "{\"name\": \"demo\", \"nodes\": [{\"name\": \"Start\", \"kind\": \"core.trigger\"}]}"}),
            )],
        );

        let (outcome, _) = dispatch(
            &mut state,
            &[
                call("c2", "validate", serde_json::json!({"path": WORKFLOW_PATH})),
                call("c3", "view", serde_json::json!({"path": WORKFLOW_PATH})),
            ],
        );
        assert!(outcome.state.ready);
        assert!(outcome.ready_workflow.is_some());
        assert_eq!(outcome.responses.len(), 1, "view should not run after readiness");
    }

    #[test]
    fn calls_without_ids_are_dropped() {
        let mut state = SessionState::new();
        let (outcome, events) = dispatch(
            &mut state,
            &[ToolCall {
                id: None,
                name: "view".to_string(),
                arguments: serde_json::json!({"path": WORKFLOW_PATH}),
            }],
        );
        assert!(outcome.responses.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn wrong_paths_are_guided_back_to_the_single_file() {
        let mut state = SessionState::new();
        let (outcome, _) = dispatch(
            &mut state,
            &[call("c1", "view", serde_json::json!({"path": "other.json"}))],
        );
        assert!(outcome.responses[0].content.contains("workflow.json"));
    }

    #[test]
    fn missing_tools_emit_error_events_and_responses() {
        let mut state = SessionState::new();
        let (outcome, events) = dispatch(
            &mut state,
            &[call("c1", "search_nodes", serde_json::json!({"query": "http"}))],
        );

        assert!(outcome.responses[0].content.contains("search_nodes"));
        assert_eq!(outcome.state.has_unvalidated_edits, None);
        assert!(events.iter().any(|e| matches!(
            e,
            BuildEvent::ToolProgress { status: ToolStatus::Error, .. }
        )));
    }

    #[test]
    fn validate_on_missing_document_is_recoverable() {
        let mut state = SessionState::new();
        let (outcome, _) = dispatch(
            &mut state,
            &[call("c1", "validate", serde_json::json!({"path": WORKFLOW_PATH}))],
        );
        assert!(!outcome.state.ready);
        assert!(outcome.responses[0].content.contains("no document exists"));
    }

    #[test]
    fn parse_failure_on_validate_renders_corrective_feedback() {
        let mut state = SessionState::new();
        dispatch(
            &mut state,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": "{broken"}),
            )],
        );
        let (outcome, _) = dispatch(
            &mut state,
            &[call("c2", "validate", serde_json::json!({"path": WORKFLOW_PATH}))],
        );
        assert!(!outcome.state.ready);
        assert!(outcome.responses[0].content.contains("<parse_error>"));
    }

    #[test]
    fn cancellation_stops_before_any_further_call() {
        let mut state = SessionState::new();
        let sink = CollectSink::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = dispatch_tool_calls(
            &mut state,
            &JsonWorkflowCompiler,
            &CommandToolInvoker::empty(),
            &sink,
            &BuilderConfig::default(),
            1,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": "{}"}),
            )],
            &cancel,
        );

        assert!(outcome.cancelled);
        assert!(outcome.responses.is_empty());
        assert!(!state.document.exists());
    }

    #[test]
    fn progressive_parse_note_appears_on_broken_edits() {
        let mut state = SessionState::new();
        dispatch(
            &mut state,
            &[call(
                "c1",
                "create",
                serde_json::json!({"path": WORKFLOW_PATH, "text": "{\"name\": \"demo\", \"nodes\": []}"}),
            )],
        );
        let (outcome, _) = dispatch(
            &mut state,
            &[call(
                "c2",
                "replace",
                serde_json::json!({"path": WORKFLOW_PATH, "old": "\"nodes\": []", "new": "\"nodes\": ["}),
            )],
        );
        let content = &outcome.responses[0].content;
        assert!(content.contains("replaced 1 occurrence"));
        assert!(content.contains("does not currently parse"));
    }
}
