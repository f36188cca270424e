//! Tool-kind classification and argument decoding for model tool calls.
//!
//! Dispatch is driven by an explicit enum rather than string matching at the
//! call sites; unrecognized names fall through to the generic-invoke path.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::core::types::{Replacement, ToolCall};

/// The tools the dispatcher handles itself. Anything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    View,
    Create,
    Replace,
    Insert,
    BatchReplace,
    Validate,
    Other,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "view" => Self::View,
            "create" => Self::Create,
            "replace" => Self::Replace,
            "insert" => Self::Insert,
            "batch_replace" => Self::BatchReplace,
            "validate" => Self::Validate,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewArgs {
    pub path: String,
    /// Inclusive 1-indexed `[start, end]` line range.
    #[serde(default)]
    pub range: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateArgs {
    pub path: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceArgs {
    pub path: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertArgs {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateArgs {
    pub path: String,
}

/// Decode a call's arguments into the per-kind shape.
///
/// Failures are returned as plain text: a malformed argument object is the
/// model's mistake and becomes a corrective tool response, never a fault.
pub fn decode_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, String> {
    serde_json::from_value(call.arguments.clone())
        .map_err(|err| format!("invalid arguments for tool '{}': {err}", call.name))
}

/// Decode a `batch_replace` argument object.
///
/// The replacement list is accepted either as a JSON array or as a
/// pre-serialized JSON string holding that array; some models double-encode
/// the nested list.
pub fn decode_batch_args(call: &ToolCall) -> Result<Vec<Replacement>, String> {
    let field = call
        .arguments
        .get("replacements")
        .ok_or_else(|| "invalid arguments for tool 'batch_replace': missing field `replacements`".to_string())?;

    let decoded = match field {
        serde_json::Value::String(raw) => serde_json::from_str::<Vec<Replacement>>(raw)
            .map_err(|err| format!("invalid pre-serialized replacement list: {err}")),
        other => serde_json::from_value::<Vec<Replacement>>(other.clone())
            .map_err(|err| format!("invalid replacement list: {err}")),
    }?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::{ToolKind, ViewArgs, decode_args, decode_batch_args};
    use crate::core::types::ToolCall;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: Some("call-1".to_string()),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn known_names_map_to_kinds() {
        assert_eq!(ToolKind::from_name("view"), ToolKind::View);
        assert_eq!(ToolKind::from_name("batch_replace"), ToolKind::BatchReplace);
        assert_eq!(ToolKind::from_name("validate"), ToolKind::Validate);
        assert_eq!(ToolKind::from_name("search_nodes"), ToolKind::Other);
    }

    #[test]
    fn view_range_decodes_from_json_array() {
        let args: ViewArgs = decode_args(&call(
            "view",
            serde_json::json!({"path": "workflow.json", "range": [2, 5]}),
        ))
        .expect("decode");
        assert_eq!(args.range, Some((2, 5)));
    }

    #[test]
    fn malformed_args_become_text_errors() {
        let err = decode_args::<ViewArgs>(&call("view", serde_json::json!({"range": [1, 2]})))
            .expect_err("missing path");
        assert!(err.contains("view"));
        assert!(err.contains("path"));
    }

    #[test]
    fn batch_args_accept_inline_arrays() {
        let replacements = decode_batch_args(&call(
            "batch_replace",
            serde_json::json!({"replacements": [{"old": "a", "new": "b"}]}),
        ))
        .expect("decode");
        assert_eq!(replacements.len(), 1);
        assert_eq!(replacements[0].old, "a");
    }

    #[test]
    fn batch_args_accept_double_encoded_lists() {
        let replacements = decode_batch_args(&call(
            "batch_replace",
            serde_json::json!({"replacements": "[{\"old\": \"a\", \"new\": \"b\"}]"}),
        ))
        .expect("decode");
        assert_eq!(replacements[0].new, "b");
    }

    #[test]
    fn batch_args_reject_garbage_strings() {
        let err = decode_batch_args(&call(
            "batch_replace",
            serde_json::json!({"replacements": "not json"}),
        ))
        .expect_err("garbage");
        assert!(err.contains("pre-serialized"));
    }
}
