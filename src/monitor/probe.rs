//! Activity probes consulted on each monitor sample.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

use crate::remote::{CommandRunner, RemoteCommand, RemoteError, RemoteShell};

/// Errors raised while probing for activity. They never stop the monitor.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe command could not run.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The probe command ran but failed.
    #[error("activity probe exited with status {status:?}: {stderr}")]
    Failed {
        /// Remote exit code.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },
    /// The probe output could not be interpreted.
    #[error("unexpected activity probe output: {0}")]
    Unparseable(String),
}

/// Future returned by [`ActivityProbe::sample`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ProbeError>> + Send + 'a>>;

/// A source of activity observations.
pub trait ActivityProbe: Send {
    /// Returns `true` when activity happened since the previous sample.
    fn sample(&mut self) -> ProbeFuture<'_>;
}

/// Treats a change in the reverse proxy access log's modification time as
/// activity.
///
/// The first successful sample only records a baseline.
#[derive(Debug)]
pub struct AccessLogProbe<R: CommandRunner> {
    shell: RemoteShell<R>,
    address: IpAddr,
    path: String,
    last_modified: Option<i64>,
}

impl<R: CommandRunner> AccessLogProbe<R> {
    /// Creates a probe reading `path` on the host at `address`.
    #[must_use]
    pub fn new(shell: RemoteShell<R>, address: IpAddr, path: impl Into<String>) -> Self {
        Self {
            shell,
            address,
            path: path.into(),
            last_modified: None,
        }
    }

    async fn modified_at(&self) -> Result<i64, ProbeError> {
        let command = RemoteCommand::new("stat", ["-c", "%Y", self.path.as_str()]);
        let output = self.shell.run(self.address, &command).await?;
        if !output.is_success() {
            return Err(ProbeError::Failed {
                status: output.code,
                stderr: output.stderr.trim().to_owned(),
            });
        }
        let text = output.stdout.trim();
        text.parse::<i64>()
            .map_err(|_| ProbeError::Unparseable(text.to_owned()))
    }
}

impl<R: CommandRunner> ActivityProbe for AccessLogProbe<R> {
    fn sample(&mut self) -> ProbeFuture<'_> {
        Box::pin(async move {
            let modified = self.modified_at().await?;
            let changed = self
                .last_modified
                .is_some_and(|previous| previous != modified);
            self.last_modified = Some(modified);
            Ok(changed)
        })
    }
}
