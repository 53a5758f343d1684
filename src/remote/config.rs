//! SSH settings used for remote setup, activity probes and tunnels.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default SSH port on leased instances.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH client settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GPULEASE_SSH",
    discovery(
        app_name = "gpulease",
        env_var = "GPULEASE_CONFIG_PATH",
        config_file_name = "gpulease.toml",
        dotfile_name = ".gpulease.toml",
        project_file_name = "gpulease.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// TCP port of the remote SSH daemon.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub port: u16,
    /// Private key used for authentication. Supports a leading `~/`.
    pub identity_file: Option<String>,
    /// Lets SSH prompt for passwords or passphrases. Off by default, so SSH
    /// runs with `BatchMode=yes` and fails instead of blocking.
    #[ortho_config(default = false)]
    pub allow_prompts: bool,
    /// Whether to enforce host key checking; disabled by default because
    /// leased hosts are new on every run.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
}

/// Errors raised when loading the SSH configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl SshConfig {
    /// Loads configuration from defaults, configuration files and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("gpulease")])
            .map_err(|err| SshConfigLoadError::Parse(err.to_string()))
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`super::RemoteError::InvalidConfig`] when a field is blank.
    pub fn validate(&self) -> Result<(), super::RemoteError> {
        Self::require_optional_value(Some(self.bin.as_str()), "bin")?;
        Self::require_optional_value(Some(self.user.as_str()), "user")?;
        Self::require_optional_value(self.identity_file.as_deref(), "identity_file")?;
        if self.port == 0 {
            return Err(super::RemoteError::InvalidConfig {
                field: String::from("port"),
            });
        }
        Ok(())
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), super::RemoteError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(super::RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }
}
