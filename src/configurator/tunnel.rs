//! Handle for the background SSH tunnel of the private profile.

use std::fmt;

use tracing::warn;

use crate::remote::{BackgroundProcess, RemoteError};

/// Owns a running tunnel process and closes it when dropped.
pub struct TunnelHandle {
    process: Option<Box<dyn BackgroundProcess>>,
    command_line: String,
}

impl TunnelHandle {
    /// Wraps a spawned tunnel process.
    #[must_use]
    pub fn new(process: Box<dyn BackgroundProcess>, command_line: impl Into<String>) -> Self {
        Self {
            process: Some(process),
            command_line: command_line.into(),
        }
    }

    /// Equivalent shell command an operator can run by hand.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Returns `true` until [`TunnelHandle::close`] has been called.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.process.is_some()
    }

    /// Terminates the tunnel. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] when the process cannot be signalled.
    pub fn close(&mut self) -> Result<(), RemoteError> {
        self.process
            .take()
            .map_or(Ok(()), |mut process| process.terminate())
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("open", &self.is_open())
            .field("command_line", &self.command_line)
            .finish()
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close tunnel");
        }
    }
}
