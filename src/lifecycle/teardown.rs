//! Single-fire teardown of a leased instance.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use crate::control_plane::{ApiError, ControlPlane};

/// Result of a teardown attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownReport {
    /// The stop request succeeded.
    Stopped,
    /// The stop request failed; the instance may still be running.
    Failed(ApiError),
    /// Another caller already ran teardown.
    AlreadyTornDown,
}

impl TeardownReport {
    /// Returns `true` unless the stop request failed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("instance stopped"),
            Self::Failed(err) => write!(f, "stop request failed: {err}"),
            Self::AlreadyTornDown => f.write_str("teardown already performed"),
        }
    }
}

/// Issues at most one stop request for an instance, however many paths ask.
pub struct TeardownGuard<'a, C: ControlPlane + ?Sized> {
    control_plane: &'a C,
    instance_id: String,
    fired: AtomicBool,
}

impl<'a, C: ControlPlane + ?Sized> TeardownGuard<'a, C> {
    /// Arms a guard for `instance_id`.
    #[must_use]
    pub fn new(control_plane: &'a C, instance_id: impl Into<String>) -> Self {
        Self {
            control_plane,
            instance_id: instance_id.into(),
            fired: AtomicBool::new(false),
        }
    }

    /// Instance this guard stops.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether teardown has started.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stops the instance on the first call; later calls return
    /// [`TeardownReport::AlreadyTornDown`] without contacting the control
    /// plane. Failures are logged, never raised.
    pub async fn teardown(&self) -> TeardownReport {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TeardownReport::AlreadyTornDown;
        }

        match self.control_plane.stop_instance(&self.instance_id).await {
            Ok(()) => {
                info!(instance_id = %self.instance_id, "instance stopped");
                TeardownReport::Stopped
            }
            Err(err) => {
                error!(
                    instance_id = %self.instance_id,
                    error = %err,
                    "failed to stop instance; it may still be running"
                );
                TeardownReport::Failed(err)
            }
        }
    }
}
