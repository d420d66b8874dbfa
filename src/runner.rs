//! External command execution
//!
//! Every `qvm-*`, `qubes-prefs` and `qubesctl` invocation goes through
//! [`run_command`] so that:
//!
//! - children run in their own process group and die with us
//! - PIDs are registered for cleanup on SIGINT/SIGTERM
//! - the exact command line is logged

use crate::error::{QubesError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Prefix the command with `sudo`
    pub fn with_sudo(self) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() {
                write!(f, " ''")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// How the child's stdout/stderr are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collect stdout/stderr for parsing (queries)
    Capture,
    /// Pass through to our terminal (mutations, `qubesctl --show-output`)
    Inherit,
}

/// Output from a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output (empty in `Inherit` mode)
    pub stdout: String,
    /// Standard error (empty in `Inherit` mode)
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Stdout with surrounding whitespace removed
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Turn a non-zero exit into `QubesError::Command`
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let code = self.exit_code.unwrap_or(-1);
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(QubesError::command(format!("`{}` returned exit code {}", spec, code)))
        } else {
            Err(QubesError::command(format!(
                "`{}` returned exit code {}: {}",
                spec, code, stderr
            )))
        }
    }
}

/// Spawn `spec`, wait for it and return its output.
///
/// A non-zero exit is NOT an error here; callers decide with
/// [`CommandOutput::ensure_success`]. Failing to spawn is.
pub fn run_command(spec: &CommandSpec, mode: OutputMode) -> Result<CommandOutput> {
    debug!("Running command {}", spec);

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).stdin(Stdio::null()).in_new_process_group();
    match mode {
        OutputMode::Capture => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        OutputMode::Inherit => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
    }

    let child = cmd
        .spawn()
        .map_err(|e| QubesError::command(format!("failed to spawn `{}`: {}", spec, e)))?;
    let pid = child.id();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid, spec.to_string());
    }

    let waited = child.wait_with_output();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }

    let output =
        waited.map_err(|e| QubesError::command(format!("failed waiting for `{}`: {}", spec, e)))?;

    let exit_code = output.status.code();
    if !output.status.success() {
        info!("`{}` exited with code {}", spec, exit_code.unwrap_or(-1));
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code,
        success: output.status.success(),
    })
}

/// Run a query and return its trimmed stdout, failing on non-zero exit
pub fn query(spec: &CommandSpec) -> Result<String> {
    let output = run_command(spec, OutputMode::Capture)?.ensure_success(spec)?;
    Ok(output.trimmed().to_string())
}
