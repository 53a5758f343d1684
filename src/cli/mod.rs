//! Command-line interface definitions for the `gpulease` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `gpulease` binary.
#[derive(Debug, Parser)]
#[command(
    name = "gpulease",
    about = "Lease a GPU instance, deploy a workload and stop it when idle",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision, configure and monitor an instance until it goes idle.
    #[command(
        name = "up",
        about = "Provision, configure and monitor an instance until it goes idle"
    )]
    Up(UpCommand),
}

/// How the workload is exposed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum ProfileArg {
    /// Public domain with TLS and optional basic authentication.
    PublicHttps,
    /// Ports forwarded to this machine over SSH.
    Tunnel,
}

impl ProfileArg {
    /// Name understood by the `profile` configuration key.
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::PublicHttps => "public-https",
            Self::Tunnel => "tunnel",
        }
    }
}

/// Arguments for the `gpulease up` subcommand.
///
/// Every flag overrides the matching configuration value for this run only.
#[derive(Debug, Parser)]
pub(crate) struct UpCommand {
    /// GPU type to request from the control plane.
    #[arg(long, value_name = "TYPE")]
    pub(crate) gpu_type: Option<String>,
    /// Container image to run on the instance.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Deployment profile.
    #[arg(long, value_enum, value_name = "PROFILE")]
    pub(crate) profile: Option<ProfileArg>,
    /// Domain served by the public HTTPS profile.
    #[arg(long, value_name = "DOMAIN")]
    pub(crate) domain: Option<String>,
    /// Contact email for certificate issuance.
    #[arg(long, value_name = "EMAIL")]
    pub(crate) email: Option<String>,
    /// Basic authentication user; the password is read from
    /// `GPULEASE_ADMIN_PASSWORD` or the configuration file.
    #[arg(long, value_name = "USER")]
    pub(crate) admin_user: Option<String>,
    /// Comma-separated ports forwarded by the tunnel profile.
    #[arg(long, value_name = "PORTS")]
    pub(crate) tunnel_ports: Option<String>,
    /// Seconds without activity before the instance is stopped.
    #[arg(long, value_name = "SECS")]
    pub(crate) idle_threshold: Option<u64>,
    /// Seconds to wait for readiness before giving up; 0 waits forever.
    #[arg(long, value_name = "SECS")]
    pub(crate) max_wait: Option<u64>,
}
