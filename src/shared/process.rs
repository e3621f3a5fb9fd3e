//! External command execution.
//!
//! Every interaction with `terraform`, `az`, `netsh` and the application health
//! check goes through a [`CommandRunner`] so pipelines can be exercised without
//! the real binaries.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_code_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// A single invocation of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Collect stdout/stderr instead of streaming them to the terminal.
    pub capture: bool,
    /// Changes cloud or local state; skipped under dry-run.
    pub mutating: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            capture: true,
            mutating: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn streaming(mut self) -> Self {
        self.capture = false;
        self
    }

    pub fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    /// Name of the program without its directory, e.g. `terraform`.
    pub fn program_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Shell-like rendering used in logs and dry-run output.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program_name()];
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                parts.push(format!("\"{}\"", arg.replace('"', "\\\"")));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an error carrying the tool's own message.
    pub fn ensure_success(self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(ProcessError::Failed {
            command: command.display(),
            code: self.code,
            stderr,
        })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError>;

    /// Run and fail on a non-zero exit status.
    async fn run_checked(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        self.run(command).await?.ensure_success(command)
    }
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        (**self).run(command).await
    }
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        debug!(command = %command.display(), capture = command.capture, "running");

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let spawn_error = |source| ProcessError::Spawn {
            command: command.display(),
            source,
        };

        if command.capture {
            let output = cmd
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(spawn_error)?;
            Ok(ToolOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        } else {
            let status = cmd
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(spawn_error)?;
            Ok(ToolOutput {
                code: status.code(),
                ..ToolOutput::default()
            })
        }
    }
}

/// Prints mutating commands instead of running them.
pub struct DryRunRunner<R> {
    inner: R,
}

impl<R: CommandRunner> DryRunRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for DryRunRunner<R> {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        if command.mutating {
            println!("[dry-run] {}", command.display());
            return Ok(ToolOutput::ok(""));
        }
        self.inner.run(command).await
    }
}

/// Replays canned output for commands whose program and leading arguments
/// match a rule, recording every invocation. Unmatched commands succeed with
/// empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, String, ToolOutput)>,
    seen: Mutex<Vec<ToolCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// First matching rule wins.
    pub fn on(mut self, program: &str, args_prefix: &str, output: ToolOutput) -> Self {
        self.rules
            .push((program.to_string(), args_prefix.to_string(), output));
        self
    }

    pub fn invocations(&self) -> Vec<ToolCommand> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    /// Invocations rendered with [`ToolCommand::display`].
    pub fn commands(&self) -> Vec<String> {
        self.invocations().iter().map(ToolCommand::display).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(command.clone());
        }
        let program = command.program_name();
        let args = command.args.join(" ");
        let output = self
            .rules
            .iter()
            .find(|(p, prefix, _)| *p == program && args.starts_with(prefix.as_str()))
            .map(|(_, _, output)| output.clone())
            .unwrap_or_else(|| ToolOutput::ok(""));
        Ok(output)
    }
}
