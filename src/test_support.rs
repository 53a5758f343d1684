//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here are small: a control plane that replays
//! scripted responses, a command runner that replays scripted outputs, and a
//! shared [`CallLog`] so tests can assert the relative order of API calls and
//! remote commands.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::control_plane::{
    ApiError, ControlPlane, ControlPlaneFuture, Instance, InstanceStatus, ProvisioningRequest,
};
use crate::remote::{
    BackgroundProcess, CommandOutput, CommandRunner, CommandSpec, RemoteError, RunnerFuture,
};

/// One observable interaction with a double.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// `create_instance` was invoked.
    Create,
    /// `get_status` was invoked for the id.
    GetStatus(String),
    /// `stop_instance` was invoked for the id.
    Stop(String),
    /// A command ran to completion (rendered command line).
    Command(String),
    /// A background process was spawned (rendered command line).
    Spawn(String),
}

/// Shared, ordered record of calls made against the doubles.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Returns a snapshot of every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Counts calls matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    /// Number of stop requests recorded.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Stop(_)))
    }

    /// Number of status queries recorded.
    #[must_use]
    pub fn status_count(&self) -> usize {
        self.count(|call| matches!(call, Call::GetStatus(_)))
    }

    /// Rendered command lines of completed commands, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Command(line) => Some(line),
                _ => None,
            })
            .collect()
    }
}

/// Builds an [`Instance`] snapshot for scripted responses.
#[must_use]
pub fn instance(id: &str, status: InstanceStatus, public_ip: Option<&str>) -> Instance {
    Instance {
        id: id.to_owned(),
        status,
        public_ip: public_ip.map(str::to_owned),
        volume_id: None,
    }
}

#[derive(Debug)]
struct PlaneState {
    create: Result<Instance, ApiError>,
    statuses: VecDeque<Result<Instance, ApiError>>,
    stop: Result<(), ApiError>,
}

/// Control plane double replaying scripted responses.
///
/// Status responses are consumed in FIFO order; the last one is repeated once
/// the queue would otherwise run dry.
#[derive(Clone, Debug)]
pub struct ScriptedControlPlane {
    state: Arc<Mutex<PlaneState>>,
    log: CallLog,
}

impl ScriptedControlPlane {
    /// Creates a double whose create call returns a pending `id`.
    #[must_use]
    pub fn new(id: &str, log: CallLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaneState {
                create: Ok(instance(id, InstanceStatus::Pending, None)),
                statuses: VecDeque::new(),
                stop: Ok(()),
            })),
            log,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PlaneState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Makes the create call fail with `error`.
    pub fn fail_create(&self, error: ApiError) {
        self.with_state(|state| state.create = Err(error));
    }

    /// Queues a status response.
    pub fn push_status(&self, response: Result<Instance, ApiError>) {
        self.with_state(|state| state.statuses.push_back(response));
    }

    /// Makes stop requests fail with `error`.
    pub fn fail_stop(&self, error: ApiError) {
        self.with_state(|state| state.stop = Err(error));
    }

    /// Returns the shared call log.
    #[must_use]
    pub const fn log(&self) -> &CallLog {
        &self.log
    }
}

impl ControlPlane for ScriptedControlPlane {
    fn create_instance<'a>(
        &'a self,
        _request: &'a ProvisioningRequest,
    ) -> ControlPlaneFuture<'a, Instance> {
        Box::pin(async move {
            self.log.record(Call::Create);
            self.with_state(|state| state.create.clone())
        })
    }

    fn get_status<'a>(&'a self, id: &'a str) -> ControlPlaneFuture<'a, Instance> {
        Box::pin(async move {
            self.log.record(Call::GetStatus(id.to_owned()));
            self.with_state(|state| {
                if state.statuses.len() > 1 {
                    state.statuses.pop_front()
                } else {
                    state.statuses.front().cloned()
                }
            })
            .unwrap_or_else(|| Err(ApiError::transport("no scripted status available")))
        })
    }

    fn stop_instance<'a>(&'a self, id: &'a str) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            self.log.record(Call::Stop(id.to_owned()));
            tokio::task::yield_now().await;
            self.with_state(|state| state.stop.clone())
        })
    }
}

#[derive(Clone, Debug)]
enum ScriptedResponse {
    Output(CommandOutput),
    Error(RemoteError),
    Hang,
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<ScriptedResponse>,
    fallback: Option<CommandOutput>,
    spawn_error: Option<RemoteError>,
    invocations: Vec<CommandSpec>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
    log: CallLog,
    processes: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ScriptedRunner {
    /// Creates a runner with no queued responses.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(RunnerState::default())),
            log,
            processes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RunnerState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        let output = CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        };
        self.with_state(|state| state.responses.push_back(ScriptedResponse::Output(output)));
    }

    /// Pushes a runner error.
    pub fn push_error(&self, error: RemoteError) {
        self.with_state(|state| state.responses.push_back(ScriptedResponse::Error(error)));
    }

    /// Pushes a command that never completes.
    pub fn push_hang(&self) {
        self.with_state(|state| state.responses.push_back(ScriptedResponse::Hang));
    }

    /// Answers every unscripted command with a successful empty output.
    pub fn succeed_by_default(&self) {
        self.with_state(|state| {
            state.fallback = Some(CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            });
        });
    }

    /// Makes background spawns fail.
    pub fn fail_spawn(&self, error: RemoteError) {
        self.with_state(|state| state.spawn_error = Some(error));
    }

    /// Returns every command spec seen so far, including spawns.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.with_state(|state| state.invocations.clone())
    }

    /// Returns whether every spawned background process has been terminated.
    #[must_use]
    pub fn all_processes_terminated(&self) -> bool {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .all(|flag| flag.load(Ordering::SeqCst))
    }

    /// Number of background processes spawned so far.
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> RunnerFuture<'a> {
        Box::pin(async move {
            let response = self.with_state(|state| {
                state.invocations.push(command.clone());
                state.responses.pop_front().or_else(|| {
                    state
                        .fallback
                        .clone()
                        .map(ScriptedResponse::Output)
                })
            });
            self.log.record(Call::Command(command.command_line()));
            match response {
                Some(ScriptedResponse::Output(output)) => Ok(output),
                Some(ScriptedResponse::Error(error)) => Err(error),
                Some(ScriptedResponse::Hang) => std::future::pending().await,
                None => Err(RemoteError::Spawn {
                    program: command.program.clone(),
                    message: String::from("no scripted response available"),
                }),
            }
        })
    }

    fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn BackgroundProcess>, RemoteError> {
        let failure = self.with_state(|state| {
            state.invocations.push(command.clone());
            state.spawn_error.clone()
        });
        if let Some(error) = failure {
            return Err(error);
        }
        self.log.record(Call::Spawn(command.command_line()));
        let flag = Arc::new(AtomicBool::new(false));
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&flag));
        Ok(Box::new(ScriptedProcess { terminated: flag }))
    }
}

/// Background process double that remembers termination.
#[derive(Debug)]
pub struct ScriptedProcess {
    terminated: Arc<AtomicBool>,
}

impl BackgroundProcess for ScriptedProcess {
    fn terminate(&mut self) -> Result<(), RemoteError> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
