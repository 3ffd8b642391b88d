//! Invokes the external agent CLI as a black box: a prompt in, text out.
//!
//! Spawn with piped stdout/stderr, poll with non-blocking `try_wait`,
//! kill and drain the pipes on deadline. No retries here — retry policy
//! belongs to the supervisor.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use deespec_types::workflow::ALLOWED_AGENTS;

/// Output of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    /// Combined stdout/stderr text, as the review decoder and artifact
    /// writer expect to see it.
    pub text: String,
    pub timed_out: bool,
    pub duration: Duration,
    pub exit_code: i32,
}

/// Invoke `agent_id` (must be in [`ALLOWED_AGENTS`]) with `prompt` piped
/// to stdin, waiting at most `timeout`. On timeout the child is killed
/// and whatever was captured before the deadline is returned with
/// `timed_out = true` rather than an error — the stage engine turns a
/// timeout into a synthetic `NEEDS_CHANGES` artifact, it does not treat
/// it as a hard failure of the tick itself.
pub fn invoke(agent_id: &str, prompt: &str, timeout: Duration) -> Result<AgentOutput> {
    if !ALLOWED_AGENTS.contains(&agent_id) {
        anyhow::bail!("agent '{agent_id}' is not in the allowed agent whitelist");
    }
    invoke_program(agent_id, prompt, timeout)
}

/// The mechanics of [`invoke`], without the whitelist gate, so tests can
/// exercise spawn/timeout/kill behavior against real-but-unlisted
/// programs (`cat`, `sleep`).
fn invoke_program(program: &str, prompt: &str, timeout: Duration) -> Result<AgentOutput> {
    let start = Instant::now();
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn agent '{program}'"))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(prompt.as_bytes());
    }

    let deadline = Instant::now() + timeout;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll agent '{program}'"))?
        {
            Some(status) => {
                let mut text = read_pipe(child.stdout.take());
                text.push_str(&read_pipe(child.stderr.take()));
                return Ok(AgentOutput {
                    text,
                    timed_out: false,
                    duration: start.elapsed(),
                    exit_code: status.code().unwrap_or(-1),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let mut text = read_pipe(child.stdout.take());
                    text.push_str(&read_pipe(child.stderr.take()));
                    text.push_str(&format!(
                        "\nagent '{program}' timed out after {}",
                        humantime::format_duration(timeout)
                    ));
                    return Ok(AgentOutput {
                        text,
                        timed_out: true,
                        duration: start.elapsed(),
                        exit_code: -1,
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Pluggable agent invocation. The Stage Engine depends on this trait
/// rather than calling [`invoke`] directly, so its own tests can
/// substitute a scripted double instead of shelling out to a real agent
/// binary.
pub trait AgentInvoker {
    fn invoke(&self, agent_id: &str, prompt: &str, timeout: Duration) -> Result<AgentOutput>;
}

/// The real invoker: shells out to `agent_id` via [`invoke`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessAgentInvoker;

impl AgentInvoker for ProcessAgentInvoker {
    fn invoke(&self, agent_id: &str, prompt: &str, timeout: Duration) -> Result<AgentOutput> {
        invoke(agent_id, prompt, timeout)
    }
}
