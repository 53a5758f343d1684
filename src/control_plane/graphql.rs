//! GraphQL control-plane client.
//!
//! Requests are sent as JSON `{query, variables}` documents with a bearer
//! credential. Both HTTP-level failures and GraphQL `errors` arrays are mapped
//! onto [`ApiError`]; server errors and rate limiting count as transport
//! failures.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Instance, InstanceStatus, ProvisioningRequest};
use super::{ApiError, ApiErrorKind, ControlPlane, ControlPlaneFuture};

/// Default GraphQL endpoint.
pub const DEFAULT_API_URL: &str = "https://api.runpod.io/graphql";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_INSTANCE: &str = "mutation CreateInstance($input: CreateInstanceInput!) { \
     createInstance(input: $input) { id status publicIp volumeId } }";
const GET_INSTANCE: &str = "query GetInstance($id: ID!) { instance(id: $id) { id status publicIp } }";
const STOP_INSTANCE: &str = "mutation StopInstance($id: ID!) { stopInstance(id: $id) { id status } }";

#[derive(Serialize)]
struct GraphQlRequest<V> {
    query: &'static str,
    variables: V,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Serialize)]
struct CreateVariables<'a> {
    input: CreateInstanceInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInstanceInput<'a> {
    name: &'a str,
    gpu_type: &'a str,
    image_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_id: Option<&'a str>,
    ports: Vec<PortInput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env: Vec<EnvInput<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortInput {
    port: u16,
    is_public: bool,
}

#[derive(Serialize)]
struct EnvInput<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct IdVariables<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    create_instance: Option<InstancePayload>,
}

#[derive(Deserialize)]
struct QueryData {
    instance: Option<InstancePayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopData {
    #[expect(dead_code, reason = "payload presence is all the stop path needs")]
    stop_instance: Option<InstancePayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstancePayload {
    id: String,
    status: String,
    #[serde(default)]
    public_ip: Option<String>,
    #[serde(default)]
    volume_id: Option<String>,
}

impl InstancePayload {
    fn into_instance(self) -> Result<Instance, ApiError> {
        if self.id.trim().is_empty() {
            return Err(ApiError::rejected("control plane returned an empty instance id"));
        }
        let status = self
            .status
            .parse::<InstanceStatus>()
            .map_err(ApiError::rejected)?;
        Ok(Instance {
            id: self.id,
            status,
            public_ip: self.public_ip.filter(|ip| !ip.trim().is_empty()),
            volume_id: self.volume_id,
        })
    }
}

/// Control-plane client speaking GraphQL over HTTPS.
#[derive(Clone, Debug)]
pub struct GraphQlControlPlane {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl GraphQlControlPlane {
    /// Creates a client for `url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] with [`ApiErrorKind::Transport`] when the HTTP
    /// client cannot be initialised.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| ApiError::transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
        })
    }

    async fn execute<V, T>(
        &self,
        operation: &str,
        query: &'static str,
        variables: V,
    ) -> Result<T, ApiError>
    where
        V: Serialize + Send,
        T: DeserializeOwned + Send,
    {
        debug!(operation, url = %self.url, "sending control-plane request");
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .map_err(|err| ApiError::transport(format!("{operation}: {err}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ApiError::transport(format!("{operation}: {err}")))?;

        if !status.is_success() {
            let message = format!(
                "{operation} returned HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            );
            // 5xx and 429 are retryable.
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ApiError::transport(message));
            }
            return Err(ApiError::rejected(message));
        }

        let parsed: GraphQlResponse<T> = serde_json::from_slice(&body).map_err(|err| {
            ApiError::rejected(format!("malformed {operation} response: {err}"))
        })?;

        if !parsed.errors.is_empty() {
            let message = parsed
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if is_not_found(&message) {
                return Err(ApiError::not_found(message));
            }
            return Err(ApiError::rejected(format!("{operation}: {message}")));
        }

        parsed
            .data
            .ok_or_else(|| ApiError::rejected(format!("{operation} response carried no data")))
    }
}

fn is_not_found(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("not found") || lowered.contains("does not exist")
}

fn is_already_stopped(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("already stopped") || lowered.contains("not running")
}

impl ControlPlane for GraphQlControlPlane {
    fn create_instance<'a>(
        &'a self,
        request: &'a ProvisioningRequest,
    ) -> ControlPlaneFuture<'a, Instance> {
        Box::pin(async move {
            let input = CreateInstanceInput {
                name: &request.name,
                gpu_type: &request.gpu_type,
                image_name: &request.image,
                volume_id: request.volume_id.as_deref(),
                ports: request
                    .ports
                    .iter()
                    .map(|spec| PortInput {
                        port: spec.port,
                        is_public: spec.is_public,
                    })
                    .collect(),
                env: request
                    .env
                    .iter()
                    .map(|var| EnvInput {
                        key: &var.key,
                        value: &var.value,
                    })
                    .collect(),
            };
            let data: CreateData = self
                .execute("createInstance", CREATE_INSTANCE, CreateVariables { input })
                .await?;
            data.create_instance
                .ok_or_else(|| ApiError::rejected("createInstance returned no instance"))?
                .into_instance()
        })
    }

    fn get_status<'a>(&'a self, id: &'a str) -> ControlPlaneFuture<'a, Instance> {
        Box::pin(async move {
            let data: QueryData = self
                .execute("instance", GET_INSTANCE, IdVariables { id })
                .await?;
            data.instance
                .ok_or_else(|| ApiError::not_found(format!("instance {id} not found")))?
                .into_instance()
        })
    }

    fn stop_instance<'a>(&'a self, id: &'a str) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let result: Result<StopData, ApiError> = self
                .execute("stopInstance", STOP_INSTANCE, IdVariables { id })
                .await;
            match result {
                Ok(_) => Ok(()),
                Err(err) if err.kind == ApiErrorKind::NotFound => {
                    debug!(instance_id = id, "stop target unknown; treating as stopped");
                    Ok(())
                }
                Err(err) if is_already_stopped(&err.detail) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}
