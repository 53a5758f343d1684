//! Immutable descriptions of what to configure on a ready instance.

use std::fmt;

use super::ConfigurationError;

/// Default nginx site name.
pub const DEFAULT_SITE_NAME: &str = "gpulease";

/// Default htpasswd location on the instance.
pub const DEFAULT_HTPASSWD_PATH: &str = "/etc/nginx/.htpasswd";

/// Default nginx access log consulted for activity.
pub const DEFAULT_ACCESS_LOG_PATH: &str = "/var/log/nginx/access.log";

/// One remote setup action of the public HTTPS sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SetupStep {
    /// Install reverse proxy, certificate tool and container runtime.
    InstallPackages,
    /// Start the workload container on the internal port.
    StartContainer,
    /// Write and enable the virtual host, plus the credential file.
    WriteProxyConfig,
    /// Validate and restart the reverse proxy.
    RestartProxy,
    /// Obtain and install a TLS certificate.
    IssueCertificate,
    /// Reload the proxy to pick up the certificate.
    ReloadProxy,
}

impl SetupStep {
    /// The full sequence in execution order.
    pub const ALL: [Self; 6] = [
        Self::InstallPackages,
        Self::StartContainer,
        Self::WriteProxyConfig,
        Self::RestartProxy,
        Self::IssueCertificate,
        Self::ReloadProxy,
    ];

    /// Stable kebab-case name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InstallPackages => "install-packages",
            Self::StartContainer => "start-container",
            Self::WriteProxyConfig => "write-proxy-config",
            Self::RestartProxy => "restart-proxy",
            Self::IssueCertificate => "issue-certificate",
            Self::ReloadProxy => "reload-proxy",
        }
    }

    /// 1-based position in [`SetupStep::ALL`].
    #[must_use]
    pub const fn number(self) -> usize {
        match self {
            Self::InstallPackages => 1,
            Self::StartContainer => 2,
            Self::WriteProxyConfig => 3,
            Self::RestartProxy => 4,
            Self::IssueCertificate => 5,
            Self::ReloadProxy => 6,
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// HTTP basic authentication credentials.
#[derive(Clone, Eq, PartialEq)]
pub struct AdminCredentials {
    /// Login name.
    pub username: String,
    /// Secret, only ever sent over SSH standard input.
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the public HTTPS sequence needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigurationPlan {
    /// Public domain served by the proxy.
    pub domain: String,
    /// Contact address for certificate issuance.
    pub email: String,
    /// Optional basic authentication credentials.
    pub credentials: Option<AdminCredentials>,
    /// Name given to the workload container.
    pub container_name: String,
    /// Workload container image.
    pub image: String,
    /// Port the workload listens on, published on loopback only.
    pub app_port: u16,
    /// Whether the container gets access to all GPUs.
    pub gpus: bool,
    /// nginx site name.
    pub site_name: String,
    /// Location of the credential file on the instance.
    pub htpasswd_path: String,
    /// Prefix privileged commands with `sudo`.
    pub elevate: bool,
    /// Steps to execute, in order.
    pub steps: Vec<SetupStep>,
}

impl ConfigurationPlan {
    /// Creates a plan running every step with default paths.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        email: impl Into<String>,
        image: impl Into<String>,
        app_port: u16,
    ) -> Self {
        Self {
            domain: domain.into(),
            email: email.into(),
            credentials: None,
            container_name: String::from("workload"),
            image: image.into(),
            app_port,
            gpus: true,
            site_name: DEFAULT_SITE_NAME.to_owned(),
            htpasswd_path: DEFAULT_HTPASSWD_PATH.to_owned(),
            elevate: false,
            steps: SetupStep::ALL.to_vec(),
        }
    }

    /// Requires basic authentication with the given credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<AdminCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Overrides the container name.
    #[must_use]
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Enables or disables GPU access for the container.
    #[must_use]
    pub const fn with_gpus(mut self, gpus: bool) -> Self {
        self.gpus = gpus;
        self
    }

    /// Prefixes privileged commands with `sudo`.
    #[must_use]
    pub const fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    /// Checks that values are well formed before anything runs remotely.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidPlan`] describing the first bad
    /// value.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_domain(&self.domain)?;
        validate_email(&self.email)?;
        if let Some(credentials) = &self.credentials {
            validate_username(&credentials.username)?;
            if credentials.password.is_empty() || has_line_break(&credentials.password) {
                return Err(ConfigurationError::InvalidPlan(String::from(
                    "admin password must be non-empty and a single line",
                )));
            }
        }
        if !is_token(&self.container_name) {
            return Err(ConfigurationError::InvalidPlan(format!(
                "container name '{}' may only contain letters, digits, '-', '_' and '.'",
                self.container_name
            )));
        }
        if !is_token(&self.site_name) {
            return Err(ConfigurationError::InvalidPlan(format!(
                "site name '{}' may only contain letters, digits, '-', '_' and '.'",
                self.site_name
            )));
        }
        if self.image.trim().is_empty() || self.image.chars().any(char::is_whitespace) {
            return Err(ConfigurationError::InvalidPlan(String::from(
                "container image must be a single non-empty reference",
            )));
        }
        if self.app_port == 0 {
            return Err(ConfigurationError::InvalidPlan(String::from(
                "application port must be non-zero",
            )));
        }
        Ok(())
    }
}

/// Ports forwarded by the private tunnel profile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunnelPlan {
    /// Ports forwarded from the operator's machine to the instance.
    pub ports: Vec<u16>,
}

impl TunnelPlan {
    /// Creates a plan; duplicate and zero ports are dropped.
    #[must_use]
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        let mut unique = Vec::new();
        for port in ports {
            if port != 0 && !unique.contains(&port) {
                unique.push(port);
            }
        }
        Self { ports: unique }
    }
}

/// How the workload is exposed; exactly one per deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Deployment {
    /// Public HTTPS through a reverse proxy.
    PublicHttps(ConfigurationPlan),
    /// Private access through a local SSH tunnel.
    PrivateTunnel(TunnelPlan),
}

fn has_line_break(value: &str) -> bool {
    value.chars().any(|ch| ch.is_control())
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

fn validate_domain(domain: &str) -> Result<(), ConfigurationError> {
    let labels_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    });
    if domain.len() > 253 || !domain.contains('.') || !labels_ok {
        return Err(ConfigurationError::InvalidPlan(format!(
            "'{domain}' is not a valid domain name"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ConfigurationError> {
    let valid = email.split_once('@').is_some_and(|(local, host)| {
        !local.is_empty()
            && !host.is_empty()
            && host.contains('.')
            && !email
                .chars()
                .any(|ch| ch.is_whitespace() || ch.is_control() || matches!(ch, '\'' | '"'))
    });
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidPlan(format!(
            "'{email}' is not a valid contact email"
        )))
    }
}

fn validate_username(username: &str) -> Result<(), ConfigurationError> {
    if username.is_empty()
        || username.contains(':')
        || username
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control())
    {
        return Err(ConfigurationError::InvalidPlan(String::from(
            "admin username must be non-empty without whitespace or ':'",
        )));
    }
    Ok(())
}
