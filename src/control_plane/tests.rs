//! Tests for the GraphQL control-plane client against a mock HTTP server.

use rstest::rstest;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

fn request() -> ProvisioningRequest {
    ProvisioningRequest::builder()
        .name("gpulease-test")
        .gpu_type("NVIDIA-RTX4090")
        .image("ghcr.io/open-webui/open-webui:ollama")
        .port(22, true)
        .port(443, true)
        .env("OLLAMA_KEEP_ALIVE", "-1")
        .volume_id(Some(String::from("vol-1")))
        .build()
        .unwrap_or_else(|err| panic!("request fixture should be valid: {err}"))
}

async fn server_answering(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn client_for(server: &MockServer) -> GraphQlControlPlane {
    GraphQlControlPlane::new(format!("{}/graphql", server.uri()), "secret-token")
        .unwrap_or_else(|err| panic!("client should build: {err}"))
}

#[tokio::test]
async fn create_instance_sends_bearer_and_typed_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({
            "variables": {
                "input": {
                    "gpuType": "NVIDIA-RTX4090",
                    "imageName": "ghcr.io/open-webui/open-webui:ollama",
                    "volumeId": "vol-1",
                    "ports": [{"port": 22, "isPublic": true}, {"port": 443, "isPublic": true}],
                    "env": [{"key": "OLLAMA_KEEP_ALIVE", "value": "-1"}]
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"createInstance": {"id": "i-1", "status": "PENDING", "publicIp": null}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let instance = client_for(&server)
        .create_instance(&request())
        .await
        .unwrap_or_else(|err| panic!("create should succeed: {err}"));

    assert_eq!(instance.id, "i-1");
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.public_ip, None);
}

#[tokio::test]
async fn create_instance_maps_graphql_errors_to_rejection() {
    let server = server_answering(json!({
        "data": null,
        "errors": [{"message": "no GPUs of type NVIDIA-RTX4090 available"}]
    }))
    .await;

    let err = client_for(&server)
        .create_instance(&request())
        .await
        .expect_err("create should be rejected");

    assert_eq!(err.kind, ApiErrorKind::RemoteRejected);
    assert!(err.detail.contains("no GPUs"), "detail: {}", err.detail);
}

#[tokio::test]
async fn create_instance_rejects_empty_identifier() {
    let server = server_answering(json!({
        "data": {"createInstance": {"id": "", "status": "PENDING"}}
    }))
    .await;

    let err = client_for(&server)
        .create_instance(&request())
        .await
        .expect_err("empty id must be rejected");

    assert_eq!(err.kind, ApiErrorKind::RemoteRejected);
}

#[rstest]
#[case::unauthorised(401, ApiErrorKind::RemoteRejected)]
#[case::bad_request(400, ApiErrorKind::RemoteRejected)]
#[case::server_error(500, ApiErrorKind::Transport)]
#[case::bad_gateway(502, ApiErrorKind::Transport)]
#[case::unavailable(503, ApiErrorKind::Transport)]
#[case::rate_limited(429, ApiErrorKind::Transport)]
#[tokio::test]
async fn non_success_http_status_maps_to_error_kind(
    #[case] status: u16,
    #[case] expected: ApiErrorKind,
) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string("denied"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_status("i-1")
        .await
        .expect_err("non-2xx should fail");

    assert_eq!(err.kind, expected);
    assert!(err.detail.contains("denied"), "detail: {}", err.detail);
}

#[tokio::test]
async fn get_status_decodes_running_instance_with_address() {
    let server = server_answering(json!({
        "data": {"instance": {"id": "i-1", "status": "RUNNING", "publicIp": "1.2.3.4"}}
    }))
    .await;

    let instance = client_for(&server)
        .get_status("i-1")
        .await
        .unwrap_or_else(|err| panic!("status should decode: {err}"));

    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(
        instance.ready_address().map(|ip| ip.to_string()),
        Some(String::from("1.2.3.4"))
    );
}

#[tokio::test]
async fn get_status_reports_null_instance_as_not_found() {
    let server = server_answering(json!({"data": {"instance": null}})).await;

    let err = client_for(&server)
        .get_status("i-404")
        .await
        .expect_err("null instance should be not found");

    assert_eq!(err.kind, ApiErrorKind::NotFound);
}

#[tokio::test]
async fn get_status_rejects_unknown_status() {
    let server = server_answering(json!({
        "data": {"instance": {"id": "i-1", "status": "HIBERNATING"}}
    }))
    .await;

    let err = client_for(&server)
        .get_status("i-1")
        .await
        .expect_err("unknown status should fail decoding");

    assert_eq!(err.kind, ApiErrorKind::RemoteRejected);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap_or_else(|err| panic!("bind listener: {err}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener addr: {err}"));
    drop(listener);
    let url = format!("http://{addr}/graphql");

    let err = GraphQlControlPlane::new(url, "token")
        .unwrap_or_else(|err| panic!("client should build: {err}"))
        .get_status("i-1")
        .await
        .expect_err("closed server should fail");

    assert!(err.is_transport(), "unexpected error: {err}");
}

#[rstest]
#[case(json!({"data": {"stopInstance": {"id": "i-1", "status": "STOPPED"}}}))]
#[case(json!({"data": null, "errors": [{"message": "Instance i-1 not found"}]}))]
#[case(json!({"data": null, "errors": [{"message": "instance is already stopped"}]}))]
#[tokio::test]
async fn stop_instance_is_idempotent(#[case] body: serde_json::Value) {
    let server = server_answering(body).await;

    client_for(&server)
        .stop_instance("i-1")
        .await
        .unwrap_or_else(|err| panic!("stop should be idempotent: {err}"));
}

#[tokio::test]
async fn stop_instance_surfaces_other_rejections() {
    let server = server_answering(json!({
        "data": null,
        "errors": [{"message": "permission denied"}]
    }))
    .await;

    let err = client_for(&server)
        .stop_instance("i-1")
        .await
        .expect_err("permission errors should surface");

    assert_eq!(err.kind, ApiErrorKind::RemoteRejected);
}
