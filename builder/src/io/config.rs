//! Builder configuration (TOML).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Session configuration.
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuilderConfig {
    /// Ceiling on model turns before the session fails.
    pub max_iterations: u32,

    /// Separate, smaller ceiling on auto-finalize correction rounds.
    pub max_finalize_attempts: u32,

    /// Byte budget for feedback packs; droppable sections go first.
    pub feedback_budget_bytes: usize,

    /// Wall-clock budget for one generic tool command.
    pub tool_timeout_secs: u64,

    /// Truncate generic tool output beyond this many bytes.
    pub tool_output_limit_bytes: usize,

    /// When set, per-iteration session logs are written beneath this root.
    pub log_root: Option<PathBuf>,

    /// Generic tool name -> argv for the command invoker.
    pub tools: BTreeMap<String, Vec<String>>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_finalize_attempts: 3,
            feedback_budget_bytes: 16_000,
            tool_timeout_secs: 120,
            tool_output_limit_bytes: 100_000,
            log_root: None,
            tools: BTreeMap::new(),
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_finalize_attempts == 0 {
            return Err(anyhow!("max_finalize_attempts must be > 0"));
        }
        if self.feedback_budget_bytes == 0 {
            return Err(anyhow!("feedback_budget_bytes must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.tool_output_limit_bytes == 0 {
            return Err(anyhow!("tool_output_limit_bytes must be > 0"));
        }
        for (name, argv) in &self.tools {
            if argv.is_empty() || argv[0].trim().is_empty() {
                return Err(anyhow!("tools.{name} must be a non-empty argv array"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BuilderConfig::default()`.
pub fn load_config(path: &Path) -> Result<BuilderConfig> {
    if !path.exists() {
        let cfg = BuilderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BuilderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
