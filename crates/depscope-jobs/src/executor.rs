//! External collector process execution.
//!
//! Collectors are black-box executables: invoked with the component
//! coordinate substituted into their argument template, they must emit a
//! single JSON document on stdout and exit zero. Anything else is a
//! failure. Execution is bounded by the catalog timeout and runs with a
//! copy of the worker's environment minus the queue connection secrets.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::process::Command;
use tracing::debug;

/// Why a collector attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecFailure {
    /// The command could not be spawned at all.
    Spawn(String),
    /// The process exited with a non-zero status.
    NonZeroExit(Option<i32>),
    /// The process outlived its timeout and was killed.
    Timeout(u64),
    /// Stdout was not a single JSON document.
    InvalidOutput(String),
}

impl std::fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecFailure::Spawn(e) => write!(f, "spawn failed: {}", e),
            ExecFailure::NonZeroExit(Some(code)) => write!(f, "exit code {}", code),
            ExecFailure::NonZeroExit(None) => write!(f, "terminated by signal"),
            ExecFailure::Timeout(secs) => write!(f, "killed after {}s timeout", secs),
            ExecFailure::InvalidOutput(e) => write!(f, "stdout was not JSON: {}", e),
        }
    }
}

/// Outcome of one collector attempt.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Clean exit with parseable JSON on stdout.
    Succeeded(JsonValue),
    Failed(ExecFailure),
}

/// Snapshot of the current process environment minus the denylisted
/// variables (the queue connection secrets).
pub fn filtered_env(denylist: &[String]) -> HashMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| !denylist.iter().any(|denied| denied == name))
        .collect()
}

/// Run one assembled collector command to completion, bounded by `timeout`.
///
/// The child is started with exactly the provided environment (nothing is
/// inherited). A child that exceeds the timeout is killed, not abandoned:
/// `kill_on_drop` tears the process down when the timed-out future is
/// dropped.
pub async fn execute(
    argv: &[String],
    env: &HashMap<String, String>,
    timeout: Duration,
) -> ExecOutcome {
    let Some((program, args)) = argv.split_first() else {
        return ExecOutcome::Failed(ExecFailure::Spawn("empty command".to_string()));
    };

    debug!(
        subsystem = "worker",
        component = "executor",
        op = "execute",
        command = %argv.join(" "),
        timeout_secs = timeout.as_secs(),
        "Running collector"
    );

    let mut command = Command::new(program);
    command
        .args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => return ExecOutcome::Failed(ExecFailure::Timeout(timeout.as_secs())),
        Ok(Err(e)) => return ExecOutcome::Failed(ExecFailure::Spawn(e.to_string())),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return ExecOutcome::Failed(ExecFailure::NonZeroExit(output.status.code()));
    }

    match serde_json::from_slice(&output.stdout) {
        Ok(value) => ExecOutcome::Succeeded(value),
        Err(e) => ExecOutcome::Failed(ExecFailure::InvalidOutput(e.to_string())),
    }
}
