//! Post-provision configuration of a ready instance.
//!
//! The public HTTPS profile runs [`SetupStep::ALL`] in order over SSH and
//! stops at the first failure. The private profile opens a local SSH tunnel
//! instead. Nothing here tears the instance down: a failed configuration
//! leaves the host running so it can be inspected.

use std::net::IpAddr;

use thiserror::Error;
use tracing::info;

use crate::remote::{CommandRunner, RemoteError, RemoteShell};

mod plan;
mod steps;
mod tunnel;
mod vhost;

pub use plan::{
    AdminCredentials, ConfigurationPlan, DEFAULT_ACCESS_LOG_PATH, DEFAULT_HTPASSWD_PATH,
    DEFAULT_SITE_NAME, Deployment, SetupStep, TunnelPlan,
};
pub use tunnel::TunnelHandle;

/// Errors raised while configuring an instance.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A remote step exited unsuccessfully.
    #[error(
        "setup step {step} failed with exit status {}: {stderr}",
        .status.map_or_else(|| String::from("unknown"), |code| code.to_string())
    )]
    StepFailed {
        /// Failing step.
        step: SetupStep,
        /// Remote exit code, when one was reported.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },
    /// The local SSH client could not run a step.
    #[error("setup step {step} could not run: {source}")]
    Spawn {
        /// Step being attempted.
        step: SetupStep,
        /// Underlying process error.
        #[source]
        source: RemoteError,
    },
    /// The tunnel process could not be started.
    #[error("failed to open ssh tunnel: {0}")]
    Tunnel(#[source] RemoteError),
    /// The plan holds malformed values.
    #[error("invalid configuration plan: {0}")]
    InvalidPlan(String),
}

impl ConfigurationError {
    /// Step the error relates to, if any.
    #[must_use]
    pub const fn step(&self) -> Option<SetupStep> {
        match self {
            Self::StepFailed { step, .. } | Self::Spawn { step, .. } => Some(*step),
            Self::Tunnel(_) | Self::InvalidPlan(_) => None,
        }
    }
}

/// What configuration achieved.
#[derive(Debug)]
pub struct ConfigurationReport {
    /// Steps that completed, in order.
    pub completed: Vec<SetupStep>,
    /// Where the workload can be reached.
    pub endpoint: String,
    /// Live tunnel for the private profile.
    pub tunnel: Option<TunnelHandle>,
}

/// Applies a [`Deployment`] to a reachable instance.
#[derive(Debug)]
pub struct RemoteConfigurator<R: CommandRunner> {
    shell: RemoteShell<R>,
    deployment: Deployment,
}

impl<R: CommandRunner> RemoteConfigurator<R> {
    /// Creates a configurator for `deployment`.
    #[must_use]
    pub const fn new(shell: RemoteShell<R>, deployment: Deployment) -> Self {
        Self { shell, deployment }
    }

    /// Returns the SSH shell used for remote steps.
    #[must_use]
    pub const fn shell(&self) -> &RemoteShell<R> {
        &self.shell
    }

    /// Returns the deployment being applied.
    #[must_use]
    pub const fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Checks the deployment without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidPlan`] for malformed plans.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match &self.deployment {
            Deployment::PublicHttps(plan) => plan.validate(),
            Deployment::PrivateTunnel(plan) if plan.ports.is_empty() => Err(
                ConfigurationError::InvalidPlan(String::from("tunnel needs at least one port")),
            ),
            Deployment::PrivateTunnel(_) => Ok(()),
        }
    }

    /// Configures the instance at `address`.
    ///
    /// Dropping the returned future aborts the step in flight and kills its
    /// `ssh` process.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] naming the failing step; remaining
    /// steps are skipped.
    pub async fn apply(&self, address: IpAddr) -> Result<ConfigurationReport, ConfigurationError> {
        self.validate()?;
        match &self.deployment {
            Deployment::PublicHttps(plan) => self.apply_public(address, plan).await,
            Deployment::PrivateTunnel(plan) => self.open_tunnel(address, plan),
        }
    }

    async fn apply_public(
        &self,
        address: IpAddr,
        plan: &ConfigurationPlan,
    ) -> Result<ConfigurationReport, ConfigurationError> {
        let mut completed = Vec::with_capacity(plan.steps.len());
        for &step in &plan.steps {
            info!(%address, step = step.name(), "running setup step {}", step.number());
            let command = steps::command_for(step, plan);
            let output = self
                .shell
                .run(address, &command)
                .await
                .map_err(|source| ConfigurationError::Spawn { step, source })?;
            if !output.is_success() {
                return Err(ConfigurationError::StepFailed {
                    step,
                    status: output.code,
                    stderr: output.stderr.trim().to_owned(),
                });
            }
            completed.push(step);
        }
        Ok(ConfigurationReport {
            completed,
            endpoint: format!("https://{}", plan.domain),
            tunnel: None,
        })
    }

    fn open_tunnel(
        &self,
        address: IpAddr,
        plan: &TunnelPlan,
    ) -> Result<ConfigurationReport, ConfigurationError> {
        let command_line = self.shell.tunnel_spec(address, &plan.ports).command_line();
        let process = self
            .shell
            .spawn_tunnel(address, &plan.ports)
            .map_err(ConfigurationError::Tunnel)?;
        info!(%address, command = %command_line, "ssh tunnel open");
        let endpoint = plan
            .ports
            .first()
            .map_or_else(String::new, |port| format!("http://localhost:{port}"));
        Ok(ConfigurationReport {
            completed: Vec::new(),
            endpoint,
            tunnel: Some(TunnelHandle::new(process, command_line)),
        })
    }
}
