//! Control-plane abstraction for leasing disposable GPU instances.
//!
//! The orchestrator only ever talks to the control plane through the
//! [`ControlPlane`] trait. Calls carry no implicit retry; callers own the
//! retry policy.

mod graphql;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use graphql::{DEFAULT_API_URL, GraphQlControlPlane};
pub use types::{
    EnvVar, Instance, InstanceStatus, PortSpec, ProvisioningRequest, ProvisioningRequestBuilder,
    RequestError,
};

use thiserror::Error;

/// Broad category of a control-plane failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiErrorKind {
    /// The API could not be reached, answered with a server error or rate
    /// limit, or the response body could not be read.
    Transport,
    /// The control plane answered with a structured rejection.
    RemoteRejected,
    /// The control plane does not know the requested instance.
    NotFound,
}

/// Error returned by every [`ControlPlane`] operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{kind:?}: {detail}")]
pub struct ApiError {
    /// Failure category.
    pub kind: ApiErrorKind,
    /// Human readable description, usually taken from the response.
    pub detail: String,
}

impl ApiError {
    /// Builds a transport error.
    #[must_use]
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transport,
            detail: detail.into(),
        }
    }

    /// Builds a remote rejection.
    #[must_use]
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::RemoteRejected,
            detail: detail.into(),
        }
    }

    /// Builds a not-found error.
    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::NotFound,
            detail: detail.into(),
        }
    }

    /// Returns `true` for errors worth retrying at the polling layer.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Transport)
    }
}

/// Future returned by control-plane operations.
pub type ControlPlaneFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Minimal interface implemented by control-plane clients.
pub trait ControlPlane: Send + Sync {
    /// Submits a create request and returns the instance as reported.
    fn create_instance<'a>(
        &'a self,
        request: &'a ProvisioningRequest,
    ) -> ControlPlaneFuture<'a, Instance>;

    /// Fetches the current status and address of an instance.
    fn get_status<'a>(&'a self, id: &'a str) -> ControlPlaneFuture<'a, Instance>;

    /// Stops an instance. Stopping an unknown or already stopped instance
    /// succeeds.
    fn stop_instance<'a>(&'a self, id: &'a str) -> ControlPlaneFuture<'a, ()>;
}

#[cfg(test)]
mod tests;
