//! Value types exchanged with the control plane.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Lifecycle status reported by the control plane.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// Accepted but not yet running.
    Pending,
    /// Running; a public address may or may not be assigned yet.
    Running,
    /// Stopped, either on request or by the provider.
    Stopped,
    /// Provisioning failed.
    Failed,
}

impl InstanceStatus {
    /// Wire representation used by the API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "STOPPED" => Ok(Self::Stopped),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unrecognised instance status '{other}'")),
        }
    }
}

/// Snapshot of an instance as last reported by the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Identifier assigned by the control plane. Never empty.
    pub id: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Public address, present once the instance runs.
    pub public_ip: Option<String>,
    /// Persistent volume attached to the instance, if any.
    pub volume_id: Option<String>,
}

impl Instance {
    /// Returns the public address when the instance is running and the
    /// reported address parses as an IP.
    #[must_use]
    pub fn ready_address(&self) -> Option<IpAddr> {
        if self.status != InstanceStatus::Running {
            return None;
        }
        self.public_ip
            .as_deref()
            .and_then(|ip| IpAddr::from_str(ip.trim()).ok())
    }
}

/// A port exposed by the instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortSpec {
    /// Port number.
    pub port: u16,
    /// Whether the port is reachable from the internet.
    pub is_public: bool,
}

/// An environment variable passed to the workload container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvVar {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
}

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningRequest {
    /// Display name for the instance.
    pub name: String,
    /// GPU class to lease (for example `NVIDIA-RTX4090`).
    pub gpu_type: String,
    /// Container image reference run on the instance.
    pub image: String,
    /// Exposed ports.
    pub ports: Vec<PortSpec>,
    /// Environment variables for the container.
    pub env: Vec<EnvVar>,
    /// Optional persistent volume to attach.
    pub volume_id: Option<String>,
}

impl ProvisioningRequest {
    /// Starts a builder for a [`ProvisioningRequest`].
    #[must_use]
    pub fn builder() -> ProvisioningRequestBuilder {
        ProvisioningRequestBuilder::default()
    }

    /// Validates required fields.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] naming the first empty field.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.name.is_empty() {
            return Err(RequestError::Validation(String::from("name")));
        }
        if self.gpu_type.is_empty() {
            return Err(RequestError::Validation(String::from("gpu_type")));
        }
        if self.image.is_empty() {
            return Err(RequestError::Validation(String::from("image")));
        }
        if self.ports.is_empty() {
            return Err(RequestError::Validation(String::from("ports")));
        }
        if self.env.iter().any(|var| var.key.is_empty()) {
            return Err(RequestError::Validation(String::from("env")));
        }
        Ok(())
    }
}

/// Builder for [`ProvisioningRequest`] that trims and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisioningRequestBuilder {
    name: String,
    gpu_type: String,
    image: String,
    ports: Vec<PortSpec>,
    env: Vec<EnvVar>,
    volume_id: Option<String>,
}

impl ProvisioningRequestBuilder {
    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the GPU class.
    #[must_use]
    pub fn gpu_type(mut self, value: impl Into<String>) -> Self {
        self.gpu_type = value.into();
        self
    }

    /// Sets the container image.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Adds an exposed port. Duplicate port numbers keep the first entry.
    #[must_use]
    pub fn port(mut self, port: u16, is_public: bool) -> Self {
        if !self.ports.iter().any(|spec| spec.port == port) {
            self.ports.push(PortSpec { port, is_public });
        }
        self
    }

    /// Adds a container environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Sets the optional volume reference. Blank values are dropped.
    #[must_use]
    pub fn volume_id(mut self, value: Option<String>) -> Self {
        self.volume_id = value;
        self
    }

    /// Builds and validates the request, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<ProvisioningRequest, RequestError> {
        let request = ProvisioningRequest {
            name: self.name.trim().to_owned(),
            gpu_type: self.gpu_type.trim().to_owned(),
            image: self.image.trim().to_owned(),
            ports: self.ports,
            env: self
                .env
                .into_iter()
                .map(|var| EnvVar {
                    key: var.key.trim().to_owned(),
                    value: var.value,
                })
                .collect(),
            volume_id: self
                .volume_id
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Errors raised while assembling a provisioning request.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}
