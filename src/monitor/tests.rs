//! Tests for idle detection using paused Tokio time.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rstest::rstest;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::remote::{RemoteShell, SshConfig};
use crate::test_support::{CallLog, ScriptedRunner};

const THRESHOLD: Duration = Duration::from_secs(900);
const SAMPLE: Duration = Duration::from_secs(60);

struct SequenceProbe {
    results: VecDeque<Result<bool, ProbeError>>,
}

impl SequenceProbe {
    fn boxed(results: impl IntoIterator<Item = Result<bool, ProbeError>>) -> Box<Self> {
        Box::new(Self {
            results: results.into_iter().collect(),
        })
    }
}

impl ActivityProbe for SequenceProbe {
    fn sample(&mut self) -> ProbeFuture<'_> {
        let next = self.results.pop_front().unwrap_or(Ok(false));
        Box::pin(async move { next })
    }
}

#[tokio::test(start_paused = true)]
async fn fires_once_threshold_elapses_without_activity() {
    let start = Instant::now();
    let monitor = InactivityMonitor::new(ActivityState::new(THRESHOLD), SAMPLE);

    let trigger = monitor
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|| panic!("monitor should fire"));

    assert_eq!(start.elapsed(), THRESHOLD);
    assert_eq!(trigger.idle_for, THRESHOLD);
}

#[tokio::test(start_paused = true)]
async fn recorded_activity_postpones_shutdown() {
    let start = Instant::now();
    let state = ActivityState::new(THRESHOLD);
    let feed = state.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(500)).await;
        feed.record_activity();
    });

    let trigger = InactivityMonitor::new(state, SAMPLE)
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|| panic!("monitor should fire"));

    // Activity at 500s makes the instance idle from 1400s; the next sample is 1440s.
    assert_eq!(start.elapsed(), Duration::from_secs(1440));
    assert_eq!(trigger.idle_for, Duration::from_secs(940));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_sampling() {
    let cancel = CancellationToken::new();
    let trigger_cancel = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(120)).await;
        trigger_cancel.cancel();
    });
    let start = Instant::now();

    let outcome = InactivityMonitor::new(ActivityState::new(THRESHOLD), SAMPLE)
        .run(&cancel)
        .await;

    assert_eq!(outcome, None);
    assert_eq!(start.elapsed(), Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn probe_activity_resets_the_clock() {
    let start = Instant::now();
    let probe = SequenceProbe::boxed([Ok(true), Ok(true), Ok(true)]);

    InactivityMonitor::new(ActivityState::new(THRESHOLD), SAMPLE)
        .with_probe(probe)
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|| panic!("monitor should fire"));

    // Last activity at the third sample (180s).
    assert_eq!(start.elapsed(), Duration::from_secs(1080));
}

#[tokio::test(start_paused = true)]
async fn probe_failures_neither_count_nor_stop_the_monitor() {
    let start = Instant::now();
    let failures = (0..20).map(|_| {
        Err(ProbeError::Failed {
            status: Some(255),
            stderr: String::from("ssh: connect to host"),
        })
    });

    InactivityMonitor::new(ActivityState::new(THRESHOLD), SAMPLE)
        .with_probe(SequenceProbe::boxed(failures))
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|| panic!("monitor should fire"));

    assert_eq!(start.elapsed(), THRESHOLD);
}

#[rstest]
#[case::short(Duration::from_secs(30), false)]
#[case::exact(Duration::from_secs(900), true)]
#[tokio::test(start_paused = true)]
async fn idle_state_compares_against_threshold(#[case] wait: Duration, #[case] idle: bool) {
    let state = ActivityState::new(THRESHOLD);

    sleep(wait).await;

    assert_eq!(state.is_idle(), idle);
}

fn probe_with(runner: &ScriptedRunner) -> AccessLogProbe<ScriptedRunner> {
    let config = SshConfig {
        bin: String::from("ssh"),
        user: String::from("root"),
        port: 22,
        identity_file: None,
        allow_prompts: false,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
    };
    let shell = RemoteShell::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("ssh config should validate: {err}"));
    AccessLogProbe::new(
        shell,
        IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
        "/var/log/nginx/access.log",
    )
}

#[tokio::test]
async fn access_log_probe_reports_changed_mtime() {
    let log = CallLog::new();
    let runner = ScriptedRunner::new(log.clone());
    runner.push_output(Some(0), "1700000000\n", "");
    runner.push_output(Some(0), "1700000000\n", "");
    runner.push_output(Some(0), "1700000042\n", "");
    let mut probe = probe_with(&runner);

    let mut samples = Vec::new();
    for _ in 0..3 {
        samples.push(
            probe
                .sample()
                .await
                .unwrap_or_else(|err| panic!("probe should succeed: {err}")),
        );
    }

    assert_eq!(samples, vec![false, false, true]);
    let commands = log.commands();
    assert!(
        commands
            .iter()
            .all(|line| line.ends_with("stat -c '%Y' /var/log/nginx/access.log")),
        "unexpected probe commands: {commands:?}"
    );
}

#[tokio::test]
async fn access_log_probe_surfaces_remote_failures() {
    let runner = ScriptedRunner::new(CallLog::new());
    runner.push_failure(1, "stat: cannot stat: No such file or directory\n");
    runner.push_output(Some(0), "not-a-number", "");
    let mut probe = probe_with(&runner);

    let first = probe.sample().await;
    let second = probe.sample().await;

    assert!(
        matches!(first, Err(ProbeError::Failed { status: Some(1), .. })),
        "unexpected: {first:?}"
    );
    assert!(
        matches!(second, Err(ProbeError::Unparseable(ref text)) if text == "not-a-number"),
        "unexpected: {second:?}"
    );
}
