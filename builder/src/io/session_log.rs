//! Session logging under `<log_root>/<session_id>/`.
//!
//! These are product artifacts for replaying and inspecting a build session,
//! written regardless of `RUST_LOG`. One directory per iteration plus a final
//! `outcome.json` with the warning timeline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{ToolResponse, Warning};
use crate::core::warnings::TrackedWarning;
use crate::io::model::ModelTurn;

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub turn_path: PathBuf,
    pub responses_path: PathBuf,
    pub document_path: PathBuf,
    pub warnings_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, session_id: &str, iter: u32) -> Self {
        let dir = root.join(session_id).join(iter.to_string());
        Self {
            dir: dir.clone(),
            turn_path: dir.join("turn.json"),
            responses_path: dir.join("responses.json"),
            document_path: dir.join("document.txt"),
            warnings_path: dir.join("warnings.json"),
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub root: &'a Path,
    pub session_id: &'a str,
    pub iter: u32,
    pub turn: &'a ModelTurn,
    pub responses: &'a [ToolResponse],
    pub document: Option<&'a str>,
    pub new_warnings: &'a [Warning],
}

/// Final session record written next to the iteration directories.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub stop: String,
    pub iterations: u32,
    pub timeline: Vec<TrackedWarning>,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(request.root, request.session_id, request.iter);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    write_json(&paths.turn_path, request.turn)?;
    write_json(&paths.responses_path, &request.responses)?;
    if let Some(document) = request.document {
        write_text(&paths.document_path, document)?;
    }
    write_json(&paths.warnings_path, &request.new_warnings)?;

    Ok(paths)
}

pub fn write_summary(root: &Path, session_id: &str, summary: &SessionSummary) -> Result<PathBuf> {
    let dir = root.join(session_id);
    fs::create_dir_all(&dir).with_context(|| format!("create session dir {}", dir.display()))?;
    let path = dir.join("outcome.json");
    write_json(&path, summary)?;
    Ok(path)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
