//! Readiness polling for a freshly created instance.
//!
//! The poller queries the control plane on a fixed interval until the
//! instance is running with a public address, reports failure, or the
//! maximum wait elapses. Transport errors are retried on the next tick; any
//! other API error ends polling.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control_plane::{ApiError, ControlPlane, InstanceStatus};

/// Default delay between status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound on the wait for readiness.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(900);

/// Observable poller states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollState {
    /// Still waiting for the instance.
    Waiting,
    /// Running with a usable address.
    Ready,
    /// The maximum wait elapsed first.
    TimedOut,
    /// The control plane reported the instance as failed.
    Failed,
}

/// Result of a successful poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Readiness {
    /// Public address of the instance.
    pub address: IpAddr,
    /// Number of status queries issued, including the successful one.
    pub attempts: u32,
}

/// Reasons polling ended without readiness.
#[derive(Debug, Error)]
pub enum PollError {
    /// The instance did not become ready in time.
    #[error("instance {instance_id} not ready after {waited:?} ({attempts} status queries)")]
    TimedOut {
        /// Instance being polled.
        instance_id: String,
        /// Time spent waiting.
        waited: Duration,
        /// Status queries issued.
        attempts: u32,
    },
    /// The control plane reported the instance as failed.
    #[error("instance {instance_id} entered the FAILED state")]
    Failed {
        /// Instance being polled.
        instance_id: String,
    },
    /// The instance stopped before becoming ready.
    #[error("instance {instance_id} stopped before becoming ready")]
    Stopped {
        /// Instance being polled.
        instance_id: String,
    },
    /// A non-retryable API error.
    #[error("status query for {instance_id} failed: {source}")]
    Api {
        /// Instance being polled.
        instance_id: String,
        /// Underlying control-plane error.
        #[source]
        source: ApiError,
    },
    /// Polling was cancelled.
    #[error("polling cancelled")]
    Cancelled,
}

impl PollError {
    /// Terminal [`PollState`] corresponding to this error, if any.
    #[must_use]
    pub const fn state(&self) -> Option<PollState> {
        match self {
            Self::TimedOut { .. } => Some(PollState::TimedOut),
            Self::Failed { .. } | Self::Stopped { .. } => Some(PollState::Failed),
            Self::Api { .. } | Self::Cancelled => None,
        }
    }
}

/// Polls a [`ControlPlane`] until an instance is ready.
pub struct ReadinessPoller<'a, C: ControlPlane + ?Sized> {
    control_plane: &'a C,
    interval: Duration,
    max_wait: Option<Duration>,
}

impl<'a, C: ControlPlane + ?Sized> ReadinessPoller<'a, C> {
    /// Creates a poller with the default interval and maximum wait.
    #[must_use]
    pub const fn new(control_plane: &'a C) -> Self {
        Self {
            control_plane,
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: Some(DEFAULT_MAX_WAIT),
        }
    }

    /// Overrides the delay between queries.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the maximum wait; `None` waits indefinitely.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Polls `instance_id` until ready.
    ///
    /// The first query is issued immediately. No query is issued once the
    /// deadline has passed, and cancellation interrupts the wait between
    /// ticks.
    ///
    /// # Errors
    ///
    /// Returns [`PollError`] for timeouts, failed instances, fatal API errors
    /// and cancellation.
    pub async fn run(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Readiness, PollError> {
        let started = Instant::now();
        let deadline = self.max_wait.map(|wait| started + wait);
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Err(PollError::TimedOut {
                    instance_id: instance_id.to_owned(),
                    waited: started.elapsed(),
                    attempts,
                });
            }

            attempts = attempts.saturating_add(1);
            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PollError::Cancelled),
                response = self.control_plane.get_status(instance_id) => response,
            };

            match response {
                Ok(instance) => match (instance.status, instance.ready_address()) {
                    (InstanceStatus::Running, Some(address)) => {
                        info!(instance_id, %address, attempts, "instance ready");
                        return Ok(Readiness { address, attempts });
                    }
                    (InstanceStatus::Failed, _) => {
                        return Err(PollError::Failed {
                            instance_id: instance_id.to_owned(),
                        });
                    }
                    (InstanceStatus::Stopped, _) => {
                        return Err(PollError::Stopped {
                            instance_id: instance_id.to_owned(),
                        });
                    }
                    (status, _) => {
                        debug!(instance_id, %status, attempts, "instance not ready yet");
                    }
                },
                Err(err) if err.is_transport() => {
                    warn!(instance_id, attempts, error = %err, "status query failed; retrying");
                }
                Err(source) => {
                    return Err(PollError::Api {
                        instance_id: instance_id.to_owned(),
                        source,
                    });
                }
            }

            let pause = deadline.map_or(self.interval, |limit| {
                self.interval
                    .min(limit.saturating_duration_since(Instant::now()))
            });
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PollError::Cancelled),
                () = sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests;
