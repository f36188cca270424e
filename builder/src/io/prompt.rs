//! Prompt pack builder for deterministic model input.

use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Warning;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");
const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");

/// One warning prepared for rendering, with its pre-existing tag resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackWarning {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub parameter_path: Option<String>,
    #[serde(default)]
    pub pre_existing: bool,
}

impl FeedbackWarning {
    pub fn new(warning: &Warning, pre_existing: bool) -> Self {
        Self {
            code: warning.code.clone(),
            message: warning.message.clone(),
            node_name: warning.node_name.clone(),
            parameter_path: warning.parameter_path.clone(),
            pre_existing,
        }
    }
}

/// Inputs for a corrective validation-feedback message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackInput {
    #[serde(default)]
    pub parse_error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<FeedbackWarning>,
}

/// Inputs for the initial user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionsInput {
    pub instructions: String,
    #[serde(default)]
    pub baseline_source: Option<String>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("instructions", INSTRUCTIONS_TEMPLATE)
            .expect("instructions template should be valid");
        env.add_template("feedback", FEEDBACK_TEMPLATE)
            .expect("feedback template should be valid");
        Self { env }
    }

    fn render_instructions(&self, input: &InstructionsInput) -> Result<String, minijinja::Error> {
        let template = self.env.get_template("instructions")?;
        template.render(context! {
            instructions => input.instructions.trim(),
            baseline_source => input.baseline_source.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })
    }

    fn render_feedback(&self, input: &FeedbackInput) -> Result<String, minijinja::Error> {
        let template = self.env.get_template("feedback")?;
        template.render(context! {
            parse_error => input.parse_error.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            warnings => input.warnings,
        })
    }
}

/// The session's system prompt (static, no inputs).
pub fn system_prompt() -> String {
    SYSTEM_TEMPLATE.trim().to_string()
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "warnings").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Full section content.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps.get(1).unwrap().as_str().to_string();
        let required = caps.get(2).unwrap().as_str() == "required";
        let start = caps.get(0).unwrap().end();
        let end = matches
            .get(i + 1)
            .map(|m| m.get(0).unwrap().start())
            .unwrap_or(rendered.len());

        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: guidance -> baseline
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    let drop_order = ["guidance", "baseline"];
    for key in drop_order {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped_len = sections[idx].content.len();
            debug!(
                section = key,
                bytes_dropped = dropped_len,
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // If still over budget, truncate the last section.
    if total_len(sections) > budget && !sections.is_empty() {
        let other_len: usize = sections
            .iter()
            .take(sections.len() - 1)
            .map(|s| s.content.len())
            .sum();
        let allowed = budget.saturating_sub(other_len);
        let last = sections.last_mut().unwrap();
        if last.content.len() > allowed {
            if allowed > 12 {
                truncate_to_boundary(&mut last.content, allowed - 12);
                last.content.push_str("\n[truncated]");
            } else {
                truncate_to_boundary(&mut last.content, allowed);
            }
        }
    }
}

/// Byte-budget truncation that never splits a char.
fn truncate_to_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompt packs within a byte budget, dropping less critical sections
/// first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Build the initial user message.
    pub fn build_instructions(&self, input: &InstructionsInput) -> String {
        let engine = PromptEngine::new();
        let rendered = engine
            .render_instructions(input)
            .expect("instructions template rendering should not fail");
        self.pack(&rendered)
    }

    /// Build a corrective validation-feedback message.
    pub fn build_feedback(&self, input: &FeedbackInput) -> String {
        let engine = PromptEngine::new();
        let rendered = engine
            .render_feedback(input)
            .expect("feedback template rendering should not fail");
        self.pack(&rendered)
    }

    fn pack(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}
