//! Workflow builder CLI.
//!
//! `replay` drives a full build session against a recorded model script (one
//! JSON turn per line), which keeps runs deterministic; production callers
//! embed the library and plug a live model client into the same seam.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use builder::core::types::CancelFlag;
use builder::exit_codes;
use builder::gateway;
use builder::io::compiler::{Compiler, JsonWorkflowCompiler};
use builder::io::config::load_config;
use builder::io::events::{BuildEvent, EventSink};
use builder::io::invoker::CommandToolInvoker;
use builder::io::model::ScriptedModelClient;
use builder::session::{Baseline, BuildRequest, SessionStop, run_session};

#[derive(Parser)]
#[command(
    name = "builder",
    version,
    about = "LLM-driven workflow builder loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a build session against a recorded model script.
    Replay {
        /// JSONL file with one model turn per line.
        #[arg(long)]
        script: PathBuf,

        /// File holding the user's instructions.
        #[arg(long)]
        instructions: PathBuf,

        /// Existing workflow source to edit instead of starting fresh.
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Config TOML; defaults apply when the file is missing.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session id used for log directories.
        #[arg(long, default_value = "session")]
        session_id: String,
    },
    /// Parse and validate a workflow source file.
    Validate {
        /// Workflow source file.
        source: PathBuf,
    },
}

/// Prints each build event as one JSON line.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: BuildEvent) {
        if let Ok(json) = serde_json::to_string(&event) {
            println!("{json}");
        }
    }
}

fn main() {
    builder::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            script,
            instructions,
            baseline,
            config,
            session_id,
        } => cmd_replay(script, instructions, baseline, config, session_id),
        Command::Validate { source } => cmd_validate(source),
    }
}

fn cmd_replay(
    script: PathBuf,
    instructions: PathBuf,
    baseline: Option<PathBuf>,
    config: Option<PathBuf>,
    session_id: String,
) -> Result<i32> {
    let config = match config {
        Some(path) => load_config(&path)?,
        None => load_config(&PathBuf::from("builder.toml"))?,
    };
    let instructions = fs::read_to_string(&instructions)
        .with_context(|| format!("read instructions {}", instructions.display()))?;

    let baseline = match baseline {
        Some(path) => {
            let source =
                fs::read_to_string(&path).with_context(|| format!("read baseline {}", path.display()))?;
            let workflow = JsonWorkflowCompiler
                .parse(&source)
                .with_context(|| format!("parse baseline {}", path.display()))?;
            Some(Baseline { source, workflow })
        }
        None => None,
    };

    let model = ScriptedModelClient::from_path(&script)?;
    let invoker = CommandToolInvoker::from_config(&config);
    let request = BuildRequest {
        session_id,
        instructions,
        baseline,
    };

    let outcome = run_session(
        &config,
        &model,
        &JsonWorkflowCompiler,
        &invoker,
        &StdoutSink,
        &request,
        &CancelFlag::new(),
    )?;

    match outcome.stop {
        SessionStop::Ready { workflow } => {
            println!(
                "ready after {} iterations: workflow '{}' with {} nodes",
                outcome.iterations,
                workflow.name,
                workflow.nodes.len()
            );
            Ok(exit_codes::OK)
        }
        SessionStop::IterationLimit { max_iterations } => {
            eprintln!("stopped: iteration ceiling {max_iterations} reached");
            Ok(exit_codes::LIMIT)
        }
        SessionStop::FinalizeLimit { max_attempts } => {
            eprintln!("stopped: finalize ceiling {max_attempts} reached");
            Ok(exit_codes::LIMIT)
        }
        SessionStop::Cancelled => {
            eprintln!("stopped: cancelled");
            Ok(exit_codes::CANCELLED)
        }
    }
}

fn cmd_validate(source: PathBuf) -> Result<i32> {
    let contents =
        fs::read_to_string(&source).with_context(|| format!("read {}", source.display()))?;
    match gateway::parse_and_validate(&JsonWorkflowCompiler, &contents) {
        Ok(outcome) => {
            if outcome.warnings.is_empty() {
                println!("valid: no warnings");
            } else {
                for (index, warning) in outcome.warnings.iter().enumerate() {
                    println!("{}. [{}] {}", index + 1, warning.code, warning.message);
                }
            }
            Ok(exit_codes::OK)
        }
        Err(parse) => {
            eprintln!("{parse}");
            Ok(exit_codes::INVALID)
        }
    }
}
