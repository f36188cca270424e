//! Prompt Laboratory CLI for previewing builder prompt templates.
//!
//! Renders each compiled-in template against the JSON fixtures under
//! `inputs/<template>/`, writing previews to `results/` with a content-hash
//! cache so only changed fixtures re-render.

mod cache;
mod render;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cache::{RenderCache, content_hash};
use crate::render::{TEMPLATES, render_template};

#[derive(Parser)]
#[command(name = "prompt-lab")]
#[command(about = "Prompt Laboratory - preview builder templates against fixed inputs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render template x input combinations
    Run {
        /// Template name (e.g. feedback); all templates when omitted
        template: Option<String>,

        /// Force re-render even if cached
        #[arg(long)]
        force: bool,
    },

    /// List available templates and inputs
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let lab_root = find_lab_root();

    match cli.command {
        Commands::Run { template, force } => {
            let selected: Vec<&str> = match &template {
                Some(name) => vec![name.as_str()],
                None => TEMPLATES.to_vec(),
            };
            for name in selected {
                run_template(&lab_root, name, force)?;
            }
        }
        Commands::List => list_resources(&lab_root)?,
    }

    Ok(())
}

/// The lab root is the crate directory (where inputs/ lives).
fn find_lab_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn run_template(lab_root: &PathBuf, template: &str, force: bool) -> Result<()> {
    let inputs_dir = lab_root.join("inputs").join(template);
    if !inputs_dir.exists() {
        println!("{template}: no inputs directory, skipping");
        return Ok(());
    }

    let cache = RenderCache::new(lab_root);
    let mut rendered = 0usize;
    let mut skipped = 0usize;

    for entry in fs::read_dir(&inputs_dir)
        .with_context(|| format!("read inputs {}", inputs_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_none_or(|e| e != "json") {
            continue;
        }
        let input_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let input_json = fs::read_to_string(&path)
            .with_context(|| format!("read input {}", path.display()))?;
        let input_hash = content_hash(&input_json);

        if !force && cache.has_cached(template, &input_hash, &input_id) {
            skipped += 1;
            continue;
        }

        let preview = render_template(template, &input_json)
            .with_context(|| format!("render {template}/{input_id}"))?;
        let out = cache.save(template, &input_hash, &input_id, &preview)?;
        info!(template, input = %input_id, out = %out.display(), "rendered");
        rendered += 1;
    }

    println!("{template}: {rendered} rendered, {skipped} cached");
    Ok(())
}

fn list_resources(lab_root: &PathBuf) -> Result<()> {
    for template in TEMPLATES {
        println!("{template}/");
        let inputs_dir = lab_root.join("inputs").join(template);
        if !inputs_dir.exists() {
            println!("  (no inputs)");
            continue;
        }
        for entry in fs::read_dir(&inputs_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                println!("  - {}", path.file_name().unwrap_or_default().to_string_lossy());
            }
        }
    }
    Ok(())
}
