//! Generic tool invoker for calls the dispatcher does not handle itself.
//!
//! The [`ToolInvoker`] trait is the collaborator seam; the in-repo backend
//! maps tool names to configured commands and feeds the argument JSON on
//! stdin, with a wall-clock timeout and bounded output capture.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::ToolCall;
use crate::io::config::BuilderConfig;

/// Abstraction over generic tool execution backends.
pub trait ToolInvoker {
    /// Run the tool and return its textual result for the conversation.
    fn invoke(&self, call: &ToolCall) -> Result<String>;
}

/// Runs configured commands for named tools.
pub struct CommandToolInvoker {
    commands: BTreeMap<String, Vec<String>>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandToolInvoker {
    pub fn new(
        commands: BTreeMap<String, Vec<String>>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            commands,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &BuilderConfig) -> Self {
        Self::new(
            config.tools.clone(),
            Duration::from_secs(config.tool_timeout_secs),
            config.tool_output_limit_bytes,
        )
    }

    /// An invoker with no tools; every call reports a missing implementation.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), Duration::from_secs(1), 1024)
    }
}

impl ToolInvoker for CommandToolInvoker {
    #[instrument(skip_all, fields(tool = %call.name))]
    fn invoke(&self, call: &ToolCall) -> Result<String> {
        let argv = self
            .commands
            .get(&call.name)
            .ok_or_else(|| anyhow!("no tool named '{}' is available", call.name))?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        let stdin = serde_json::to_string(&call.arguments).context("serialize tool arguments")?;

        let output = run_bounded(cmd, stdin.as_bytes(), self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run tool '{}'", call.name))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "tool timed out");
            return Err(anyhow!(
                "tool '{}' timed out after {:?}",
                call.name,
                self.timeout
            ));
        }
        if !output.status_success {
            return Err(anyhow!(
                "tool '{}' exited with status {:?}: {}",
                call.name,
                output.status_code,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        debug!("tool completed");
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.stdout_truncated > 0 {
            text.push_str(&format!(
                "\n[tool output truncated {} bytes]",
                output.stdout_truncated
            ));
        }
        Ok(text)
    }
}

struct BoundedOutput {
    status_success: bool,
    status_code: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: usize,
    timed_out: bool,
}

/// Run a command with a timeout, capturing stdout/stderr through reader
/// threads so a chatty child cannot deadlock on a full pipe.
fn run_bounded(
    mut cmd: Command,
    stdin: &[u8],
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<BoundedOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn tool command")?;

    {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(stdin).context("write tool stdin")?;
        // Dropping here closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for tool")? {
        Some(status) => status,
        None => {
            timed_out = true;
            child.kill().context("kill tool")?;
            child.wait().context("wait tool after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, _stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;

    Ok(BoundedOutput {
        status_success: status.success(),
        status_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes and counting the rest.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read tool output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
