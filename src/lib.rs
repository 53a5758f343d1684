//! Core library for the `gpulease` GPU instance orchestrator.
//!
//! The crate leases a GPU instance from a GraphQL control plane, waits until
//! it reports an address, deploys a containerised workload behind either a
//! public HTTPS proxy or a private SSH tunnel, and stops the instance once it
//! has been idle for long enough (create → wait → configure → monitor → stop).

pub mod config;
pub mod configurator;
pub mod control_plane;
pub mod lifecycle;
pub mod monitor;
pub mod poller;
pub mod remote;
pub mod test_support;

pub use config::{
    ConfigError, ControlPlaneConfig, DeployConfig, DeploymentProfile, provisioning_request,
};
pub use configurator::{
    ConfigurationError, ConfigurationPlan, ConfigurationReport, Deployment, RemoteConfigurator,
    SetupStep, TunnelHandle, TunnelPlan,
};
pub use control_plane::{
    ApiError, ApiErrorKind, ControlPlane, GraphQlControlPlane, Instance, InstanceStatus,
    ProvisioningRequest,
};
pub use lifecycle::{
    ActivityFeed, LifecycleError, LifecycleOrchestrator, LifecycleOutcome, LifecycleSettings,
    ShutdownReason, TeardownGuard, TeardownReport,
};
pub use monitor::{ActivityState, InactivityMonitor, ShutdownTrigger};
pub use poller::{PollError, PollState, Readiness, ReadinessPoller};
pub use remote::{CommandRunner, ProcessCommandRunner, RemoteShell, SshConfig};
