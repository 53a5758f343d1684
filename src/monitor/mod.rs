//! Idle detection for a configured instance.
//!
//! [`ActivityState`] holds the last time activity was seen. Anything can feed
//! it through [`ActivityState::record_activity`]; the monitor also consults an
//! optional [`ActivityProbe`] on every sample. Without a probe or other feed
//! the instance counts as idle from the moment monitoring starts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod probe;

pub use probe::{AccessLogProbe, ActivityProbe, ProbeError, ProbeFuture};

/// Default idle threshold.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(900);

/// Default interval between samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared last-activity timestamp plus the idle threshold.
#[derive(Clone, Debug)]
pub struct ActivityState {
    last_activity: Arc<Mutex<Instant>>,
    threshold: Duration,
}

impl ActivityState {
    /// Starts the idle clock now.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_activity: Arc::new(Mutex::new(Instant::now())),
            threshold,
        }
    }

    /// Resets the idle clock.
    pub fn record_activity(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// When activity was last recorded.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Time elapsed since the last activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }

    /// Configured idle threshold.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether the idle threshold has elapsed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle_for() >= self.threshold
    }
}

/// Emitted once when the instance has been idle for the threshold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShutdownTrigger {
    /// Idle time observed when the trigger fired.
    pub idle_for: Duration,
}

/// Samples [`ActivityState`] on a fixed interval.
pub struct InactivityMonitor {
    state: ActivityState,
    sample_interval: Duration,
    probe: Option<Box<dyn ActivityProbe>>,
}

impl InactivityMonitor {
    /// Creates a monitor sampling every `sample_interval`.
    #[must_use]
    pub fn new(state: ActivityState, sample_interval: Duration) -> Self {
        Self {
            state,
            sample_interval,
            probe: None,
        }
    }

    /// Consults `probe` on every sample.
    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn ActivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Handle for feeding activity from elsewhere.
    #[must_use]
    pub const fn state(&self) -> &ActivityState {
        &self.state
    }

    /// Samples until the idle threshold elapses or `cancel` fires.
    ///
    /// Returns `None` when cancelled.
    pub async fn run(mut self, cancel: &CancellationToken) -> Option<ShutdownTrigger> {
        let period = self.sample_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            threshold_secs = self.state.threshold().as_secs(),
            sample_secs = period.as_secs(),
            "inactivity monitor started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }

            if let Some(probe) = self.probe.as_mut() {
                let observed = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return None,
                    observed = probe.sample() => observed,
                };
                match observed {
                    Ok(true) => {
                        debug!("activity observed");
                        self.state.record_activity();
                    }
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, "activity probe failed"),
                }
            }

            let idle_for = self.state.idle_for();
            if idle_for >= self.state.threshold() {
                info!(idle_secs = idle_for.as_secs(), "idle threshold reached");
                return Some(ShutdownTrigger { idle_for });
            }
        }
    }
}

impl std::fmt::Debug for InactivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InactivityMonitor")
            .field("state", &self.state)
            .field("sample_interval", &self.sample_interval)
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests;
