//! End-to-end lease of a GPU instance.
//!
//! The orchestrator creates an instance, waits for readiness, applies the
//! deployment, monitors for inactivity and stops the instance on idle or on
//! cancellation. Every stop goes through a [`TeardownGuard`], so an instance
//! receives at most one stop request per run.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::configurator::{
    ConfigurationError, ConfigurationReport, Deployment, RemoteConfigurator,
};
use crate::control_plane::{ApiError, ControlPlane, ProvisioningRequest};
use crate::monitor::{
    AccessLogProbe, ActivityState, DEFAULT_IDLE_THRESHOLD, DEFAULT_SAMPLE_INTERVAL,
    InactivityMonitor,
};
use crate::poller::{DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, PollError, ReadinessPoller};
use crate::remote::CommandRunner;

mod teardown;

pub use teardown::{TeardownGuard, TeardownReport};

/// Timing policy for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LifecycleSettings {
    /// Delay between readiness queries.
    pub poll_interval: Duration,
    /// Upper bound on the readiness wait; `None` waits forever.
    pub max_wait: Option<Duration>,
    /// Idle time before teardown.
    pub idle_threshold: Duration,
    /// Interval between inactivity samples.
    pub sample_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: Some(DEFAULT_MAX_WAIT),
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// Where the monitor learns about activity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActivityFeed {
    /// No feed: idle is measured from the end of configuration.
    IdleSinceConfigured,
    /// Modification time of a remote access log, read over SSH.
    AccessLog(String),
}

/// Why a run ended normally.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownReason {
    /// The idle threshold elapsed.
    IdleShutdown {
        /// Idle time observed when the monitor fired.
        idle_for: Duration,
    },
    /// The operator cancelled the run.
    Cancelled,
}

/// Final state of a run that ended with teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleOutcome {
    /// Instance that was leased.
    pub instance_id: String,
    /// Why the run ended.
    pub reason: ShutdownReason,
    /// Result of the stop request.
    pub teardown: TeardownReport,
}

/// Unrecoverable failures of a run.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The create request failed; nothing was provisioned.
    #[error("failed to create instance: {0}")]
    Create(#[source] ApiError),
    /// The instance did not become ready before the maximum wait.
    #[error("instance {instance_id} did not become ready: {message}")]
    Timeout {
        /// Instance that timed out.
        instance_id: String,
        /// Description including any teardown failure.
        message: String,
        /// Result of the stop request.
        teardown: TeardownReport,
    },
    /// The control plane reported the instance as failed or stopped.
    #[error("instance {instance_id} failed to start: {message}")]
    InstanceFailed {
        /// Instance that failed.
        instance_id: String,
        /// Description including any teardown failure.
        message: String,
        /// Result of the stop request.
        teardown: TeardownReport,
    },
    /// A status query failed with a non-retryable error.
    #[error("status query for instance {instance_id} failed: {message}")]
    Poll {
        /// Instance being polled.
        instance_id: String,
        /// Description including any teardown failure.
        message: String,
        /// Control-plane error that ended polling.
        #[source]
        source: ApiError,
        /// Result of the stop request.
        teardown: TeardownReport,
    },
    /// Configuration failed; the instance is left running for inspection.
    #[error("configuration of instance {instance_id} failed (instance left running): {source}")]
    Configuration {
        /// Instance that was being configured.
        instance_id: String,
        /// Step failure.
        #[source]
        source: ConfigurationError,
    },
}

impl LifecycleError {
    /// Instance affected by the failure, if one was created.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Create(_) => None,
            Self::Timeout { instance_id, .. }
            | Self::InstanceFailed { instance_id, .. }
            | Self::Poll { instance_id, .. }
            | Self::Configuration { instance_id, .. } => Some(instance_id),
        }
    }
}

/// Drives one instance from creation to teardown.
#[derive(Debug)]
pub struct LifecycleOrchestrator<C: ControlPlane, R: CommandRunner + Clone> {
    control_plane: C,
    configurator: RemoteConfigurator<R>,
    request: ProvisioningRequest,
    settings: LifecycleSettings,
    feed: ActivityFeed,
}

impl<C: ControlPlane, R: CommandRunner + Clone + 'static> LifecycleOrchestrator<C, R> {
    /// Creates an orchestrator with default timings and no activity feed.
    #[must_use]
    pub fn new(
        control_plane: C,
        configurator: RemoteConfigurator<R>,
        request: ProvisioningRequest,
    ) -> Self {
        Self {
            control_plane,
            configurator,
            request,
            settings: LifecycleSettings::default(),
            feed: ActivityFeed::IdleSinceConfigured,
        }
    }

    /// Overrides the timing policy.
    #[must_use]
    pub const fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Selects the activity feed.
    #[must_use]
    pub fn with_activity_feed(mut self, feed: ActivityFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Runs the lease until idle shutdown, cancellation or failure.
    ///
    /// Creation is never interrupted; a cancellation that arrives while the
    /// create request is in flight stops the instance immediately afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] for create, readiness and configuration
    /// failures. Readiness failures stop the instance first; configuration
    /// failures leave it running.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        let instance = self
            .control_plane
            .create_instance(&self.request)
            .await
            .map_err(LifecycleError::Create)?;
        let instance_id = instance.id;
        info!(instance_id = %instance_id, status = %instance.status, "instance created");
        let guard = TeardownGuard::new(&self.control_plane, instance_id.clone());

        if cancel.is_cancelled() {
            return Ok(Self::finish(&guard, ShutdownReason::Cancelled, None).await);
        }

        let Some(address) = self.wait_until_ready(&guard, cancel).await? else {
            info!(instance_id = %instance_id, "cancelled while waiting for readiness");
            return Ok(Self::finish(&guard, ShutdownReason::Cancelled, None).await);
        };

        let mut report = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(instance_id = %instance_id, "cancelled during configuration");
                return Ok(Self::finish(&guard, ShutdownReason::Cancelled, None).await);
            }
            result = self.configurator.apply(address) => result.map_err(|source| {
                error!(
                    instance_id = %instance_id,
                    error = %source,
                    "configuration failed; instance left running for inspection"
                );
                LifecycleError::Configuration {
                    instance_id: instance_id.clone(),
                    source,
                }
            })?,
        };
        Self::announce(&instance_id, &report);

        let monitor = self.monitor_for(address);
        let reason = match monitor.run(cancel).await {
            Some(trigger) => ShutdownReason::IdleShutdown {
                idle_for: trigger.idle_for,
            },
            None => ShutdownReason::Cancelled,
        };
        Ok(Self::finish(&guard, reason, Some(&mut report)).await)
    }

    async fn wait_until_ready(
        &self,
        guard: &TeardownGuard<'_, C>,
        cancel: &CancellationToken,
    ) -> Result<Option<IpAddr>, LifecycleError> {
        let poller = ReadinessPoller::new(&self.control_plane)
            .with_interval(self.settings.poll_interval)
            .with_max_wait(self.settings.max_wait);
        let err = match poller.run(guard.instance_id(), cancel).await {
            Ok(readiness) => return Ok(Some(readiness.address)),
            Err(PollError::Cancelled) => return Ok(None),
            Err(err) => err,
        };

        let teardown = guard.teardown().await;
        let message = append_teardown_note(err.to_string(), &teardown);
        let instance_id = guard.instance_id().to_owned();
        Err(match err {
            PollError::TimedOut { .. } => LifecycleError::Timeout {
                instance_id,
                message,
                teardown,
            },
            PollError::Api { source, .. } => LifecycleError::Poll {
                instance_id,
                message,
                source,
                teardown,
            },
            PollError::Failed { .. } | PollError::Stopped { .. } | PollError::Cancelled => {
                LifecycleError::InstanceFailed {
                    instance_id,
                    message,
                    teardown,
                }
            }
        })
    }

    fn monitor_for(&self, address: IpAddr) -> InactivityMonitor {
        let monitor = InactivityMonitor::new(
            ActivityState::new(self.settings.idle_threshold),
            self.settings.sample_interval,
        );
        match (&self.feed, self.configurator.deployment()) {
            (ActivityFeed::AccessLog(path), Deployment::PublicHttps(_)) => {
                let probe =
                    AccessLogProbe::new(self.configurator.shell().clone(), address, path.clone());
                monitor.with_probe(Box::new(probe))
            }
            _ => monitor,
        }
    }

    fn announce(instance_id: &str, report: &ConfigurationReport) {
        match &report.tunnel {
            Some(tunnel) => info!(
                instance_id,
                endpoint = %report.endpoint,
                "tunnel ready; to reconnect manually run: {}",
                tunnel.command_line()
            ),
            None => info!(
                instance_id,
                endpoint = %report.endpoint,
                steps = report.completed.len(),
                "instance configured"
            ),
        }
    }

    async fn finish(
        guard: &TeardownGuard<'_, C>,
        reason: ShutdownReason,
        report: Option<&mut ConfigurationReport>,
    ) -> LifecycleOutcome {
        if let Some(tunnel) = report.and_then(|configured| configured.tunnel.as_mut())
            && let Err(err) = tunnel.close()
        {
            warn!(error = %err, "failed to close tunnel");
        }
        let teardown = guard.teardown().await;
        LifecycleOutcome {
            instance_id: guard.instance_id().to_owned(),
            reason,
            teardown,
        }
    }
}

fn append_teardown_note(message: String, teardown: &TeardownReport) -> String {
    if let TeardownReport::Failed(err) = teardown {
        format!("{message} (teardown also failed: {err})")
    } else {
        message
    }
}
