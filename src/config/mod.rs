//! Configuration loading via `ortho-config`.
//!
//! Two layered structs cover the control plane credentials and the
//! deployment itself; SSH settings live in [`crate::remote::SshConfig`].
//! Values merge defaults, `gpulease.toml` and environment variables. The CLI
//! applies its flags on top after loading.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::configurator::{
    AdminCredentials, ConfigurationPlan, DEFAULT_ACCESS_LOG_PATH, Deployment, TunnelPlan,
};
use crate::control_plane::{DEFAULT_API_URL, ProvisioningRequest};

/// Port of the SSH daemon exposed on every instance.
pub const SSH_PORT: u16 = 22;

const CONFIG_FILE: &str = "gpulease.toml";

/// Control plane settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "RUNPOD",
    discovery(
        app_name = "gpulease",
        env_var = "GPULEASE_CONFIG_PATH",
        config_file_name = "gpulease.toml",
        dotfile_name = ".gpulease.toml",
        project_file_name = "gpulease.toml"
    )
)]
pub struct ControlPlaneConfig {
    /// Bearer credential for the control plane API. Required.
    pub api_key: Option<String>,
    /// GraphQL endpoint.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
    /// GPU class requested for new instances.
    #[ortho_config(default = "NVIDIA-RTX4090".to_owned())]
    pub gpu_type: String,
    /// Container image the instance boots and the workload runs.
    #[ortho_config(default = "ghcr.io/open-webui/open-webui:ollama".to_owned())]
    pub image: String,
    /// Persistent volume attached to new instances.
    pub volume_id: Option<String>,
    /// Extra environment for the instance as `KEY=VALUE` pairs separated by
    /// commas.
    pub env: Option<String>,
}

/// Deployment settings: exposure profile, domain, credentials and timings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GPULEASE",
    discovery(
        app_name = "gpulease",
        env_var = "GPULEASE_CONFIG_PATH",
        config_file_name = "gpulease.toml",
        dotfile_name = ".gpulease.toml",
        project_file_name = "gpulease.toml"
    )
)]
pub struct DeployConfig {
    /// Exposure profile: `public-https` or `tunnel`.
    #[ortho_config(default = "public-https".to_owned())]
    pub profile: String,
    /// Public domain served over HTTPS.
    pub domain: Option<String>,
    /// Contact email for certificate issuance.
    pub email: Option<String>,
    /// Basic authentication user; enables authentication when set.
    pub admin_user: Option<String>,
    /// Basic authentication password.
    pub admin_password: Option<String>,
    /// Name of the workload container.
    #[ortho_config(default = "open-webui".to_owned())]
    pub container_name: String,
    /// Port the workload listens on inside the instance.
    #[ortho_config(default = 3000)]
    pub app_port: u16,
    /// Runs the workload container without the instance GPUs.
    #[ortho_config(default = false)]
    pub cpu_only: bool,
    /// Ports forwarded by the tunnel profile, comma separated.
    #[ortho_config(default = "3000,11434".to_owned())]
    pub tunnel_ports: String,
    /// Seconds without activity before teardown.
    #[ortho_config(default = 900)]
    pub idle_threshold_secs: u64,
    /// Seconds between inactivity samples.
    #[ortho_config(default = 60)]
    pub idle_sample_secs: u64,
    /// Seconds between readiness queries.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound on the readiness wait in seconds; `0` waits forever.
    #[ortho_config(default = 900)]
    pub max_wait_secs: u64,
    /// Access log whose modification time signals activity.
    #[ortho_config(default = DEFAULT_ACCESS_LOG_PATH.to_owned())]
    pub access_log_path: String,
}

/// Exposure profile selected once per deployment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentProfile {
    /// Reverse proxy with a TLS certificate on a public domain.
    PublicHttps,
    /// Local SSH port forwards only.
    PrivateTunnel,
}

impl DeploymentProfile {
    /// Canonical configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PublicHttps => "public-https",
            Self::PrivateTunnel => "tunnel",
        }
    }
}

impl fmt::Display for DeploymentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentProfile {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "public-https" | "https" | "public" => Ok(Self::PublicHttps),
            "tunnel" | "private-tunnel" | "private" => Ok(Self::PrivateTunnel),
            other => Err(ConfigError::Invalid(format!(
                "unknown profile '{other}': set GPULEASE_PROFILE or profile in {CONFIG_FILE} \
                 to 'public-https' or 'tunnel'"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {}: {reason}; check {} or {} in {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn require_field<'a>(value: Option<&'a str>, metadata: &FieldMetadata) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(metadata.missing()),
    }
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(metadata.invalid("must be greater than zero"));
    }
    Ok(())
}

const API_KEY: FieldMetadata = FieldMetadata::new("control plane API key", "RUNPOD_API_KEY", "api_key");
const API_URL: FieldMetadata = FieldMetadata::new("control plane URL", "RUNPOD_API_URL", "api_url");
const GPU_TYPE: FieldMetadata = FieldMetadata::new("GPU type", "RUNPOD_GPU_TYPE", "gpu_type");
const IMAGE: FieldMetadata = FieldMetadata::new("container image", "RUNPOD_IMAGE", "image");
const ENV: FieldMetadata = FieldMetadata::new("instance environment", "RUNPOD_ENV", "env");
const DOMAIN: FieldMetadata = FieldMetadata::new("domain name", "GPULEASE_DOMAIN", "domain");
const EMAIL: FieldMetadata = FieldMetadata::new("contact email", "GPULEASE_EMAIL", "email");
const ADMIN_PASSWORD: FieldMetadata =
    FieldMetadata::new("admin password", "GPULEASE_ADMIN_PASSWORD", "admin_password");
const APP_PORT: FieldMetadata =
    FieldMetadata::new("application port", "GPULEASE_APP_PORT", "app_port");
const TUNNEL_PORTS: FieldMetadata =
    FieldMetadata::new("tunnel ports", "GPULEASE_TUNNEL_PORTS", "tunnel_ports");
const IDLE_THRESHOLD: FieldMetadata = FieldMetadata::new(
    "idle threshold",
    "GPULEASE_IDLE_THRESHOLD_SECS",
    "idle_threshold_secs",
);
const IDLE_SAMPLE: FieldMetadata = FieldMetadata::new(
    "idle sample interval",
    "GPULEASE_IDLE_SAMPLE_SECS",
    "idle_sample_secs",
);
const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "GPULEASE_POLL_INTERVAL_SECS",
    "poll_interval_secs",
);

impl ControlPlaneConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("gpulease")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key of the first missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_key()?;
        require_field(Some(self.api_url.as_str()), &API_URL)?;
        require_field(Some(self.gpu_type.as_str()), &GPU_TYPE)?;
        require_field(Some(self.image.as_str()), &IMAGE)?;
        self.env_vars()?;
        Ok(())
    }

    /// Returns the trimmed API key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no key is configured.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        require_field(self.api_key.as_deref(), &API_KEY)
    }

    /// Parses [`ControlPlaneConfig::env`] into key/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for entries without `=` or with an
    /// empty key.
    pub fn env_vars(&self) -> Result<Vec<(String, String)>, ConfigError> {
        let Some(raw) = self.env.as_deref() else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_owned(), value.to_owned()))
                }
                _ => Err(ENV.invalid(&format!("expected KEY=VALUE, got '{entry}'"))),
            })
            .collect()
    }
}

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("gpulease")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses the configured profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown profile names.
    pub fn profile(&self) -> Result<DeploymentProfile, ConfigError> {
        self.profile.parse()
    }

    /// Parses the tunnel port list, dropping duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for entries that are not ports.
    pub fn tunnel_ports(&self) -> Result<Vec<u16>, ConfigError> {
        let mut ports = Vec::new();
        for entry in self.tunnel_ports.split(',').map(str::trim) {
            if entry.is_empty() {
                continue;
            }
            let port = entry
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| TUNNEL_PORTS.invalid(&format!("'{entry}' is not a port")))?;
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        Ok(ports)
    }

    /// Idle time before teardown.
    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    /// Interval between inactivity samples.
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sample_secs)
    }

    /// Interval between readiness queries.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Maximum readiness wait; `None` when disabled.
    #[must_use]
    pub const fn max_wait(&self) -> Option<Duration> {
        if self.max_wait_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_wait_secs))
        }
    }

    /// Performs semantic validation for the selected profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the environment variable and TOML key
    /// of the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive(self.idle_threshold_secs, &IDLE_THRESHOLD)?;
        require_positive(self.idle_sample_secs, &IDLE_SAMPLE)?;
        require_positive(self.poll_interval_secs, &POLL_INTERVAL)?;
        match self.profile()? {
            DeploymentProfile::PublicHttps => {
                require_field(self.domain.as_deref(), &DOMAIN)?;
                require_field(self.email.as_deref(), &EMAIL)?;
                if self.app_port == 0 {
                    return Err(APP_PORT.invalid("must be greater than zero"));
                }
                self.credentials()?;
            }
            DeploymentProfile::PrivateTunnel => {
                if self.tunnel_ports()?.is_empty() {
                    return Err(TUNNEL_PORTS.missing());
                }
            }
        }
        Ok(())
    }

    /// Basic authentication credentials, if a user is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a user is set without a
    /// password.
    pub fn credentials(&self) -> Result<Option<AdminCredentials>, ConfigError> {
        let Some(username) = self
            .admin_user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
        else {
            return Ok(None);
        };
        let password = self
            .admin_password
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| ADMIN_PASSWORD.missing())?;
        Ok(Some(AdminCredentials {
            username: username.to_owned(),
            password: password.to_owned(),
        }))
    }

    /// Builds the [`Deployment`] for the selected profile.
    ///
    /// `image` is the workload image; `elevate` prefixes privileged remote
    /// commands with `sudo`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn deployment(&self, image: &str, elevate: bool) -> Result<Deployment, ConfigError> {
        self.validate()?;
        match self.profile()? {
            DeploymentProfile::PublicHttps => {
                let domain = require_field(self.domain.as_deref(), &DOMAIN)?;
                let email = require_field(self.email.as_deref(), &EMAIL)?;
                let plan = ConfigurationPlan::new(domain, email, image, self.app_port)
                    .with_credentials(self.credentials()?)
                    .with_container_name(self.container_name.trim())
                    .with_gpus(!self.cpu_only)
                    .with_elevation(elevate);
                plan.validate()
                    .map_err(|err| ConfigError::Invalid(err.to_string()))?;
                Ok(Deployment::PublicHttps(plan))
            }
            DeploymentProfile::PrivateTunnel => {
                Ok(Deployment::PrivateTunnel(TunnelPlan::new(self.tunnel_ports()?)))
            }
        }
    }
}

/// Builds the provisioning request for a deployment.
///
/// SSH is always exposed publicly. The public HTTPS profile adds ports 80 and
/// 443; the tunnel profile declares its forwarded ports as private.
///
/// # Errors
///
/// Returns [`ConfigError`] when either configuration fails validation.
pub fn provisioning_request(
    control_plane: &ControlPlaneConfig,
    deploy: &DeployConfig,
) -> Result<ProvisioningRequest, ConfigError> {
    control_plane.validate()?;
    let mut builder = ProvisioningRequest::builder()
        .name(format!("gpulease-{}", Uuid::new_v4().simple()))
        .gpu_type(&control_plane.gpu_type)
        .image(&control_plane.image)
        .volume_id(control_plane.volume_id.clone())
        .port(SSH_PORT, true);
    builder = match deploy.profile()? {
        DeploymentProfile::PublicHttps => builder.port(80, true).port(443, true),
        DeploymentProfile::PrivateTunnel => deploy
            .tunnel_ports()?
            .into_iter()
            .fold(builder, |acc, port| acc.port(port, false)),
    };
    for (key, value) in control_plane.env_vars()? {
        builder = builder.env(key, value);
    }
    builder
        .build()
        .map_err(|err| ConfigError::Invalid(err.to_string()))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
