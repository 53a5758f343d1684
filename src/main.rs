//! Binary entry point for the `gpulease` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gpulease::{
    ActivityFeed, ApiError, ConfigError, ControlPlaneConfig, DeployConfig, DeploymentProfile,
    GraphQlControlPlane, LifecycleError, LifecycleOrchestrator, LifecycleOutcome,
    LifecycleSettings, ProcessCommandRunner, RemoteConfigurator, RemoteShell, ShutdownReason,
    SshConfig, TeardownReport, provisioning_request,
};

mod cli;

use cli::{Cli, UpCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("ssh configuration error: {0}")]
    Ssh(String),
    #[error("control plane client error: {0}")]
    Client(#[from] ApiError),
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("instance {instance_id} may still be running: {report}")]
    Teardown {
        instance_id: String,
        report: TeardownReport,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Up(args) => up(args).await,
    }
}

async fn up(args: UpCommand) -> Result<(), CliError> {
    let mut control_plane_config = ControlPlaneConfig::load_without_cli_args()?;
    let mut deploy_config = DeployConfig::load_without_cli_args()?;
    let ssh_config =
        SshConfig::load_without_cli_args().map_err(|err| CliError::Ssh(err.to_string()))?;
    apply_overrides(args, &mut control_plane_config, &mut deploy_config);

    let request = provisioning_request(&control_plane_config, &deploy_config)?;
    let elevate = ssh_config.user.trim() != "root";
    let deployment = deploy_config.deployment(&control_plane_config.image, elevate)?;
    let feed = activity_feed(&deploy_config)?;
    let settings = lifecycle_settings(&deploy_config);

    let shell = RemoteShell::new(ssh_config, ProcessCommandRunner)
        .map_err(|err| CliError::Ssh(err.to_string()))?;
    let client = GraphQlControlPlane::new(
        control_plane_config.api_url.as_str(),
        control_plane_config.api_key()?,
    )?;
    let orchestrator =
        LifecycleOrchestrator::new(client, RemoteConfigurator::new(shell, deployment), request)
            .with_settings(settings)
            .with_activity_feed(feed);

    let cancel = CancellationToken::new();
    spawn_interrupt_listener(cancel.clone());
    let outcome = orchestrator.run(&cancel).await?;
    finish(outcome)
}

fn apply_overrides(
    args: UpCommand,
    control_plane_config: &mut ControlPlaneConfig,
    deploy_config: &mut DeployConfig,
) {
    if let Some(gpu_type) = args.gpu_type {
        control_plane_config.gpu_type = gpu_type;
    }
    if let Some(image) = args.image {
        control_plane_config.image = image;
    }
    if let Some(profile) = args.profile {
        deploy_config.profile = profile.as_str().to_owned();
    }
    if args.domain.is_some() {
        deploy_config.domain = args.domain;
    }
    if args.email.is_some() {
        deploy_config.email = args.email;
    }
    if args.admin_user.is_some() {
        deploy_config.admin_user = args.admin_user;
    }
    if let Some(ports) = args.tunnel_ports {
        deploy_config.tunnel_ports = ports;
    }
    if let Some(secs) = args.idle_threshold {
        deploy_config.idle_threshold_secs = secs;
    }
    if let Some(secs) = args.max_wait {
        deploy_config.max_wait_secs = secs;
    }
}

fn activity_feed(deploy_config: &DeployConfig) -> Result<ActivityFeed, ConfigError> {
    Ok(match deploy_config.profile()? {
        DeploymentProfile::PublicHttps => {
            ActivityFeed::AccessLog(deploy_config.access_log_path.clone())
        }
        DeploymentProfile::PrivateTunnel => ActivityFeed::IdleSinceConfigured,
    })
}

const fn lifecycle_settings(deploy_config: &DeployConfig) -> LifecycleSettings {
    LifecycleSettings {
        poll_interval: deploy_config.poll_interval(),
        max_wait: deploy_config.max_wait(),
        idle_threshold: deploy_config.idle_threshold(),
        sample_interval: deploy_config.sample_interval(),
    }
}

fn spawn_interrupt_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; stopping instance");
                cancel.cancel();
            }
            Err(err) => warn!(error = %err, "failed to listen for interrupts"),
        }
    });
}

fn finish(outcome: LifecycleOutcome) -> Result<(), CliError> {
    match outcome.reason {
        ShutdownReason::IdleShutdown { idle_for } => info!(
            instance_id = %outcome.instance_id,
            idle_secs = idle_for.as_secs(),
            "instance stopped after inactivity"
        ),
        ShutdownReason::Cancelled => {
            info!(instance_id = %outcome.instance_id, "run cancelled");
        }
    }
    if outcome.teardown.is_success() {
        Ok(())
    } else {
        Err(CliError::Teardown {
            instance_id: outcome.instance_id,
            report: outcome.teardown,
        })
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
