//! Rendering adapter over the builder crate's compiled-in templates.

use anyhow::{Context, Result, bail};

use builder::io::prompt::{FeedbackInput, InstructionsInput, PromptBuilder, system_prompt};

/// Budget used for previews; generous so nothing is dropped unless an input
/// fixture is deliberately oversized.
const PREVIEW_BUDGET_BYTES: usize = 16_000;

/// Template names the lab can render.
pub const TEMPLATES: [&str; 3] = ["system", "instructions", "feedback"];

/// Render one template against a JSON fixture.
pub fn render_template(template: &str, input_json: &str) -> Result<String> {
    let prompts = PromptBuilder::new(PREVIEW_BUDGET_BYTES);
    match template {
        "system" => Ok(system_prompt()),
        "instructions" => {
            let input: InstructionsInput =
                serde_json::from_str(input_json).context("parse instructions input")?;
            Ok(prompts.build_instructions(&input))
        }
        "feedback" => {
            let input: FeedbackInput =
                serde_json::from_str(input_json).context("parse feedback input")?;
            Ok(prompts.build_feedback(&input))
        }
        other => bail!("unknown template '{other}' (expected one of {TEMPLATES:?})"),
    }
}
