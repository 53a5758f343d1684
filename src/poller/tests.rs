//! Tests for readiness polling with paused time.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rstest::rstest;
use serde_json::json;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::control_plane::GraphQlControlPlane;
use crate::test_support::{CallLog, ScriptedControlPlane, instance};

fn plane() -> ScriptedControlPlane {
    ScriptedControlPlane::new("i-1", CallLog::new())
}

#[rstest]
#[case::first(1)]
#[case::third(3)]
#[case::tenth(10)]
#[tokio::test(start_paused = true)]
async fn ready_on_exactly_the_nth_query(#[case] n: u32) {
    let plane = plane();
    for _ in 1..n {
        plane.push_status(Ok(instance("i-1", InstanceStatus::Pending, None)));
    }
    plane.push_status(Ok(instance("i-1", InstanceStatus::Running, Some("1.2.3.4"))));
    let start = Instant::now();

    let readiness = ReadinessPoller::new(&plane)
        .run("i-1", &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("poll should succeed: {err}"));

    assert_eq!(readiness.attempts, n);
    assert_eq!(readiness.address, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
    assert_eq!(plane.log().status_count(), n as usize);
    assert_eq!(start.elapsed(), DEFAULT_POLL_INTERVAL * (n - 1));
}

#[tokio::test(start_paused = true)]
async fn running_without_address_keeps_waiting() {
    let plane = plane();
    plane.push_status(Ok(instance("i-1", InstanceStatus::Running, None)));
    plane.push_status(Ok(instance("i-1", InstanceStatus::Running, Some("not-an-ip"))));
    plane.push_status(Ok(instance("i-1", InstanceStatus::Running, Some("10.0.0.7"))));

    let readiness = ReadinessPoller::new(&plane)
        .run("i-1", &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("poll should succeed: {err}"));

    assert_eq!(readiness.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried() {
    let plane = plane();
    plane.push_status(Err(ApiError::transport("connection reset")));
    plane.push_status(Err(ApiError::transport("timed out")));
    plane.push_status(Ok(instance("i-1", InstanceStatus::Running, Some("1.2.3.4"))));

    let readiness = ReadinessPoller::new(&plane)
        .run("i-1", &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("poll should succeed: {err}"));

    assert_eq!(readiness.attempts, 3);
}

#[tokio::test]
async fn unavailable_gateway_is_retried_until_running() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"instance": {"id": "i-1", "status": "RUNNING", "publicIp": "1.2.3.4"}}
        })))
        .mount(&server)
        .await;
    let client = GraphQlControlPlane::new(format!("{}/graphql", server.uri()), "token")
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    let readiness = ReadinessPoller::new(&client)
        .with_interval(Duration::from_millis(10))
        .run("i-1", &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("a 503 should not end polling: {err}"));

    assert_eq!(readiness.attempts, 2);
    assert_eq!(readiness.address, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
}

#[rstest]
#[case::rejected(ApiError::rejected("unauthorised"))]
#[case::not_found(ApiError::not_found("pod i-1 not found"))]
#[tokio::test(start_paused = true)]
async fn non_transport_errors_are_fatal(#[case] error: ApiError) {
    let plane = plane();
    plane.push_status(Err(error));

    let err = ReadinessPoller::new(&plane)
        .run("i-1", &CancellationToken::new())
        .await
        .expect_err("poll should fail");

    assert!(matches!(err, PollError::Api { .. }), "unexpected: {err}");
    assert_eq!(plane.log().status_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_instance_ends_polling() {
    let plane = plane();
    plane.push_status(Ok(instance("i-1", InstanceStatus::Pending, None)));
    plane.push_status(Ok(instance("i-1", InstanceStatus::Failed, None)));

    let err = ReadinessPoller::new(&plane)
        .run("i-1", &CancellationToken::new())
        .await
        .expect_err("poll should fail");

    assert!(matches!(err, PollError::Failed { .. }), "unexpected: {err}");
    assert_eq!(err.state(), Some(PollState::Failed));
}

#[tokio::test(start_paused = true)]
async fn max_wait_bounds_polling() {
    let plane = plane();
    plane.push_status(Ok(instance("i-1", InstanceStatus::Pending, None)));
    let start = Instant::now();

    let err = ReadinessPoller::new(&plane)
        .with_interval(Duration::from_secs(5))
        .with_max_wait(Some(Duration::from_secs(12)))
        .run("i-1", &CancellationToken::new())
        .await
        .expect_err("poll should time out");

    // Queries at 0s, 5s and 10s; the deadline at 12s ends the wait.
    assert!(
        matches!(err, PollError::TimedOut { attempts: 3, .. }),
        "unexpected: {err}"
    );
    assert_eq!(err.state(), Some(PollState::TimedOut));
    assert_eq!(plane.log().status_count(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_wait() {
    let plane = plane();
    plane.push_status(Ok(instance("i-1", InstanceStatus::Pending, None)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });
    let start = Instant::now();

    let err = ReadinessPoller::new(&plane)
        .with_max_wait(None)
        .run("i-1", &cancel)
        .await
        .expect_err("poll should be cancelled");

    assert!(matches!(err, PollError::Cancelled), "unexpected: {err}");
    assert_eq!(start.elapsed(), Duration::from_secs(7));
    assert_eq!(plane.log().status_count(), 2);
}
