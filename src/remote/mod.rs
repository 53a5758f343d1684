//! Remote execution over the system `ssh` client.
//!
//! Remote work is described as a [`RemoteCommand`]: a fixed program and a list
//! of arguments. Every element is shell-escaped individually before being
//! handed to SSH, so configuration values never become shell syntax.

use std::ffi::OsString;
use std::net::IpAddr;

use shell_escape::unix::escape;
use thiserror::Error;

mod config;
mod types;
mod util;

pub use config::{DEFAULT_SSH_PORT, SshConfig, SshConfigLoadError};
pub use types::{
    BackgroundProcess, CommandOutput, CommandRunner, CommandSpec, ProcessCommandRunner,
    RunnerFuture,
};
pub use util::expand_tilde;

/// Errors surfaced while preparing or running local processes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when SSH configuration is missing required values.
    #[error("missing {field}: set GPULEASE_SSH_{env_suffix} or add {field} to gpulease.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when talking to a running child fails.
    #[error("i/o error while running {program}: {message}")]
    Io {
        /// Command being run.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// A command to execute on the remote host.
#[derive(Clone, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Remote program.
    pub program: String,
    /// Remote arguments, each escaped separately.
    pub args: Vec<String>,
    /// Payload forwarded on the SSH channel's standard input.
    pub stdin: Option<String>,
}

impl RemoteCommand {
    /// Creates a command from a program and arguments.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    /// Attaches a standard input payload.
    #[must_use]
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Renders the command as a single escaped shell line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = String::from(escape(self.program.as_str().into()));
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(escape(arg.as_str().into()).as_ref());
        }
        rendered
    }
}

impl std::fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Runs remote commands and opens tunnels through SSH.
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a shell using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns the SSH configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Returns the underlying runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Executes `command` on `address` and returns its captured output.
    ///
    /// A non-zero remote exit code is reported through
    /// [`CommandOutput::code`], not as an error.
    ///
    /// # Errors
    ///
    /// Propagates failures to spawn or drive the local `ssh` process.
    pub async fn run(
        &self,
        address: IpAddr,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteError> {
        let spec = self.ssh_spec(address, command);
        self.runner.run(&spec).await
    }

    /// Builds the local `ssh` invocation for a remote command.
    #[must_use]
    pub fn ssh_spec(&self, address: IpAddr, command: &RemoteCommand) -> CommandSpec {
        let mut args = self.common_options();
        args.push(OsString::from(self.destination(address)));
        args.push(OsString::from(command.render()));
        CommandSpec {
            program: self.config.bin.clone(),
            args,
            stdin: command.stdin.clone(),
        }
    }

    /// Builds the local `ssh` invocation forwarding each port in `ports` from
    /// the operator's machine to the same port on the instance.
    #[must_use]
    pub fn tunnel_spec(&self, address: IpAddr, ports: &[u16]) -> CommandSpec {
        let mut args = vec![OsString::from("-N")];
        for port in ports {
            args.push(OsString::from("-L"));
            args.push(OsString::from(format!("{port}:localhost:{port}")));
        }
        args.push(OsString::from("-o"));
        args.push(OsString::from("ExitOnForwardFailure=yes"));
        args.extend(self.common_options());
        args.push(OsString::from(self.destination(address)));
        CommandSpec::new(self.config.bin.clone(), args)
    }

    /// Starts a background tunnel process.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] when `ssh` cannot be started.
    pub fn spawn_tunnel(
        &self,
        address: IpAddr,
        ports: &[u16],
    ) -> Result<Box<dyn BackgroundProcess>, RemoteError> {
        self.runner.spawn(&self.tunnel_spec(address, ports))
    }

    fn destination(&self, address: IpAddr) -> String {
        format!("{}@{address}", self.config.user)
    }

    fn common_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.config.port.to_string()),
        ];

        if let Some(ref identity_file) = self.config.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if !self.config.allow_prompts {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args
    }
}

#[cfg(test)]
mod tests;
