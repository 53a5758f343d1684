//! Command specs and the runner abstraction used for remote execution.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use super::RemoteError;

/// A local process invocation: program, arguments and optional stdin payload.
#[derive(Clone, Eq, PartialEq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<OsString>,
    /// Payload written to the child's standard input, if any.
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Creates a spec without standard input.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
        }
    }

    /// Renders the spec as a shell-like line for display and assertions.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

// Standard input may carry credentials, so it is never printed.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// A process left running in the background, such as an SSH tunnel.
pub trait BackgroundProcess: Send {
    /// Asks the process to stop. Calling this twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] when the signal cannot be delivered.
    fn terminate(&mut self) -> Result<(), RemoteError>;
}

impl BackgroundProcess for Child {
    fn terminate(&mut self) -> Result<(), RemoteError> {
        if matches!(self.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        self.start_kill().map_err(|err| RemoteError::Io {
            program: String::from("background process"),
            message: err.to_string(),
        })
    }
}

/// Future returned by [`CommandRunner::run`].
pub type RunnerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, RemoteError>> + Send + 'a>>;

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion, capturing stdout and stderr.
    ///
    /// Dropping the returned future terminates the child.
    fn run<'a>(&'a self, command: &'a CommandSpec) -> RunnerFuture<'a>;

    /// Starts the command without waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn BackgroundProcess>, RemoteError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).kill_on_drop(true);
        command
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> RunnerFuture<'a> {
        Box::pin(async move {
            let mut command = Self::command(spec);
            command
                .stdin(if spec.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            let mut child = command.spawn().map_err(|err| RemoteError::Spawn {
                program: spec.program.clone(),
                message: err.to_string(),
            })?;

            if let (Some(payload), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
                stdin
                    .write_all(payload.as_bytes())
                    .await
                    .map_err(|err| RemoteError::Io {
                        program: spec.program.clone(),
                        message: err.to_string(),
                    })?;
                drop(stdin);
            }

            let output = child
                .wait_with_output()
                .await
                .map_err(|err| RemoteError::Io {
                    program: spec.program.clone(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>, RemoteError> {
        let child = Self::command(spec)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| RemoteError::Spawn {
                program: spec.program.clone(),
                message: err.to_string(),
            })?;
        Ok(Box::new(child))
    }
}
