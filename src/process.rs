//! Argument-vector process execution with timeouts
//!
//! External tools (container orchestrator, git, migration scripts) are
//! always invoked with an explicit argument vector. Nothing in this
//! module ever interpolates caller input into a shell string.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::errors::{HubError, HubResult};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Captured result of a finished external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Options for a single invocation.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub cwd: Option<std::path::PathBuf>,
    pub timeout_secs: Option<u64>,
    /// Treat a non-zero exit as an error instead of returning the output.
    pub check: bool,
}

impl RunOptions {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(dir.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn checked(mut self) -> Self {
        self.check = true;
        self
    }
}

/// Run an external command, capturing output and enforcing a timeout.
///
/// A timeout kills the child and surfaces as `HubError::Timeout`; a
/// non-zero exit surfaces as `HubError::ExternalTool` only when
/// `opts.check` is set. Failures are logged, never retried here.
pub async fn run_command(argv: &[&str], opts: RunOptions) -> HubResult<CommandOutput> {
    let program = argv
        .first()
        .ok_or_else(|| HubError::internal("empty command vector"))?
        .to_string();

    let mut cmd = Command::new(&program);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &opts.cwd {
        cmd.current_dir(dir);
    }

    let timeout_secs = opts.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    let child = cmd
        .spawn()
        .map_err(|e| HubError::io(format!("spawning {program}"), e))?;

    let output = match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(HubError::io(format!("waiting for {program}"), e)),
        Err(_) => {
            tracing::error!(program = %program, timeout_secs, "command timed out");
            return Err(HubError::Timeout {
                program,
                seconds: timeout_secs,
            });
        }
    };

    let result = CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.success() {
        tracing::warn!(
            program = %program,
            status = result.status,
            stderr = %result.stderr.trim(),
            "command exited non-zero"
        );
        if opts.check {
            return Err(HubError::external_tool(
                program,
                format!("exit {}: {}", result.status, result.stderr.trim()),
            ));
        }
    }

    Ok(result)
}
