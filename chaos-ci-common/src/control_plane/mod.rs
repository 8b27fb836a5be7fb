//! Client for the remote chaos control plane.
//!
//! Authentication is a REST login that yields a bearer token; every other
//! call is a GraphQL operation against `{endpoint}/api/query`. The client
//! performs exactly one request per call. Retry policy belongs to the caller
//! ([`crate::retry`] for setup, [`crate::poll`] for status reads).

pub mod types;

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::retry::RetryableError;
use types::{
    CreateEnvironmentRequest, EnvironmentRef, ExperimentRunSummary, GraphQlResponse, InfraSummary,
    LoginRequest, LoginResponse, ProbeRequest, RegisterInfraRequest, RegisteredInfra,
    RunExperimentResponse, SaveExperimentRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_PATH: &str = "/auth/login";
const GRAPHQL_PATH: &str = "/api/query";
const CLIENT_USER_AGENT: &str = concat!("chaos-ci/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("invalid control plane endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} failed: {message}")]
    GraphQl { operation: String, message: String },

    #[error("{operation} returned no data")]
    EmptyResponse { operation: String },

    #[error("login succeeded but no access token was returned")]
    MissingToken,

    #[error("no project ID: set LITMUS_PROJECT_ID or log in with an account that owns a project")]
    MissingProject,

    #[error("could not decode {operation} response: {detail}")]
    Decode { operation: String, detail: String },
}

impl ControlPlaneError {
    /// True when the control plane reports that the requested object does
    /// not exist (yet).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 404,
            Self::GraphQl { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("no documents") || message.contains("not found")
            }
            _ => false,
        }
    }
}

impl RetryableError for ControlPlaneError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Authenticated session with the control plane. Cheap to clone; clones
/// share the underlying connection pool.
#[derive(Clone)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    project_id: Option<String>,
}

impl std::fmt::Debug for ControlPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneClient")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("token", &"***")
            .finish()
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<String, ControlPlaneError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ControlPlaneError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(trimmed.to_string())
}

fn build_http(endpoint: &str) -> Result<reqwest::Client, ControlPlaneError> {
    let mut headers = HeaderMap::new();
    let origin = HeaderValue::from_str(endpoint)
        .map_err(|_| ControlPlaneError::InvalidEndpoint(endpoint.to_string()))?;
    headers.insert(REFERER, origin.clone());
    headers.insert(ORIGIN, origin);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|source| ControlPlaneError::Http {
            url: endpoint.to_string(),
            source,
        })
}

#[derive(Deserialize)]
struct RegisterInfraData {
    #[serde(rename = "registerInfra")]
    register_infra: RegisteredInfra,
}

#[derive(Deserialize)]
struct InfraList {
    #[serde(default)]
    infras: Vec<InfraSummary>,
}

#[derive(Deserialize)]
struct ListInfrasData {
    #[serde(rename = "listInfras")]
    list_infras: InfraList,
}

#[derive(Deserialize)]
struct DeleteInfraData {
    #[serde(rename = "deleteInfra")]
    delete_infra: String,
}

#[derive(Deserialize)]
struct CreateEnvironmentData {
    #[serde(rename = "createEnvironment")]
    create_environment: EnvironmentRef,
}

#[derive(Deserialize)]
struct SaveExperimentData {
    #[serde(rename = "saveChaosExperiment")]
    save_chaos_experiment: String,
}

#[derive(Deserialize)]
struct RunExperimentData {
    #[serde(rename = "runChaosExperiment")]
    run_chaos_experiment: RunExperimentResponse,
}

#[derive(Deserialize)]
struct RunList {
    #[serde(rename = "totalNoOfExperimentRuns", default)]
    total: u64,
    #[serde(rename = "experimentRuns", default)]
    runs: Vec<ExperimentRunSummary>,
}

#[derive(Deserialize)]
struct ListRunsData {
    #[serde(rename = "listExperimentRun")]
    list_experiment_run: RunList,
}

#[derive(Deserialize)]
struct GetRunData {
    #[serde(rename = "getExperimentRun")]
    get_experiment_run: ExperimentRunSummary,
}

#[derive(Deserialize)]
struct ProbeName {
    name: String,
}

#[derive(Deserialize)]
struct AddProbeData {
    #[serde(rename = "addProbe")]
    add_probe: ProbeName,
}

const REGISTER_INFRA: &str = "mutation registerInfra($projectID: ID!, $request: RegisterInfraRequest!) {
  registerInfra(projectID: $projectID, request: $request) { infraID manifest }
}";

const LIST_INFRAS: &str = "query listInfras($projectID: ID!) {
  listInfras(projectID: $projectID) { infras { infraID name isActive isInfraConfirmed } }
}";

const DELETE_INFRA: &str = "mutation deleteInfra($projectID: ID!, $infraID: String!) {
  deleteInfra(projectID: $projectID, infraID: $infraID)
}";

const CREATE_ENVIRONMENT: &str = "mutation createEnvironment($projectID: ID!, $request: CreateEnvironmentRequest!) {
  createEnvironment(projectID: $projectID, request: $request) { environmentID name }
}";

const SAVE_EXPERIMENT: &str = "mutation saveChaosExperiment($projectID: ID!, $request: SaveChaosExperimentRequest!) {
  saveChaosExperiment(projectID: $projectID, request: $request)
}";

const RUN_EXPERIMENT: &str = "mutation runChaosExperiment($experimentID: String!, $projectID: ID!) {
  runChaosExperiment(experimentID: $experimentID, projectID: $projectID) { notifyID }
}";

const LIST_EXPERIMENT_RUNS: &str = "query listExperimentRun($projectID: ID!, $request: ListExperimentRunRequest!) {
  listExperimentRun(projectID: $projectID, request: $request) {
    totalNoOfExperimentRuns
    experimentRuns { experimentRunID experimentID notifyID phase resiliencyScore }
  }
}";

const GET_EXPERIMENT_RUN: &str = "query getExperimentRun($projectID: ID!, $experimentRunID: ID, $notifyID: ID) {
  getExperimentRun(projectID: $projectID, experimentRunID: $experimentRunID, notifyID: $notifyID) {
    experimentRunID experimentID notifyID phase resiliencyScore
  }
}";

const ADD_PROBE: &str = "mutation addProbe($projectID: ID!, $request: ProbeRequest!) {
  addProbe(request: $request, projectID: $projectID) { name }
}";

impl ControlPlaneClient {
    /// Log in with username/password. The project ID comes from the login
    /// response unless overridden with [`Self::with_project_id`].
    pub async fn login(
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, ControlPlaneError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let http = build_http(&endpoint)?;
        let url = format!("{endpoint}{LOGIN_PATH}");

        debug!(%url, username, "Logging in to control plane");
        let response = http
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|source| ControlPlaneError::Http {
                url: url.clone(),
                source,
            })?;

        let body = read_success_body("login", response, &url).await?;
        let login: LoginResponse =
            serde_json::from_str(&body).map_err(|e| ControlPlaneError::Decode {
                operation: "login".to_string(),
                detail: e.to_string(),
            })?;

        let token = login
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(ControlPlaneError::MissingToken)?;
        let project_id = login.project_id.filter(|p| !p.is_empty());

        info!(endpoint = %endpoint, project = ?project_id, "Logged in to control plane");
        Ok(Self {
            http,
            endpoint,
            token,
            project_id,
        })
    }

    /// Build a client from an already issued token.
    pub fn with_token(
        endpoint: &str,
        token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, ControlPlaneError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let http = build_http(&endpoint)?;
        let project_id = project_id.into();
        Ok(Self {
            http,
            endpoint,
            token: token.into(),
            project_id: (!project_id.is_empty()).then_some(project_id),
        })
    }

    /// Use `project_id` for every call. Empty values are ignored.
    pub fn with_project_id(mut self, project_id: &str) -> Self {
        if !project_id.is_empty() {
            self.project_id = Some(project_id.to_string());
        }
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn project_id(&self) -> Result<&str, ControlPlaneError> {
        self.project_id
            .as_deref()
            .ok_or(ControlPlaneError::MissingProject)
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, ControlPlaneError> {
        let url = format!("{}{GRAPHQL_PATH}", self.endpoint);
        debug!(operation, "Sending GraphQL request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "operationName": operation,
                "query": query,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|source| ControlPlaneError::Http {
                url: url.clone(),
                source,
            })?;

        let body = read_success_body(operation, response, &url).await?;
        let envelope: GraphQlResponse<T> =
            serde_json::from_str(&body).map_err(|e| ControlPlaneError::Decode {
                operation: operation.to_string(),
                detail: e.to_string(),
            })?;

        if let Some(first) = envelope.errors.first() {
            return Err(ControlPlaneError::GraphQl {
                operation: operation.to_string(),
                message: first.message.clone(),
            });
        }
        envelope.data.ok_or_else(|| ControlPlaneError::EmptyResponse {
            operation: operation.to_string(),
        })
    }

    pub async fn register_infra(
        &self,
        request: &RegisterInfraRequest,
    ) -> Result<RegisteredInfra, ControlPlaneError> {
        let data: RegisterInfraData = self
            .graphql(
                "registerInfra",
                REGISTER_INFRA,
                json!({ "projectID": self.project_id()?, "request": request }),
            )
            .await?;
        info!(infra_id = %data.register_infra.infra_id, name = %request.name, "Registered infrastructure");
        Ok(data.register_infra)
    }

    pub async fn list_infras(&self) -> Result<Vec<InfraSummary>, ControlPlaneError> {
        let data: ListInfrasData = self
            .graphql(
                "listInfras",
                LIST_INFRAS,
                json!({ "projectID": self.project_id()? }),
            )
            .await?;
        Ok(data.list_infras.infras)
    }

    /// Delete an infra registration. Returns the control plane's message.
    pub async fn delete_infra(&self, infra_id: &str) -> Result<String, ControlPlaneError> {
        let data: DeleteInfraData = self
            .graphql(
                "deleteInfra",
                DELETE_INFRA,
                json!({ "projectID": self.project_id()?, "infraID": infra_id }),
            )
            .await?;
        info!(infra_id, "Deleted infrastructure");
        Ok(data.delete_infra)
    }

    pub async fn create_environment(
        &self,
        request: &CreateEnvironmentRequest,
    ) -> Result<EnvironmentRef, ControlPlaneError> {
        let data: CreateEnvironmentData = self
            .graphql(
                "createEnvironment",
                CREATE_ENVIRONMENT,
                json!({ "projectID": self.project_id()?, "request": request }),
            )
            .await?;
        info!(environment_id = %data.create_environment.environment_id, "Created environment");
        Ok(data.create_environment)
    }

    pub async fn save_experiment(
        &self,
        request: &SaveExperimentRequest,
    ) -> Result<String, ControlPlaneError> {
        let data: SaveExperimentData = self
            .graphql(
                "saveChaosExperiment",
                SAVE_EXPERIMENT,
                json!({ "projectID": self.project_id()?, "request": request }),
            )
            .await?;
        info!(experiment_id = %request.id, name = %request.name, "Saved chaos experiment");
        Ok(data.save_chaos_experiment)
    }

    /// Trigger a run of a saved experiment. Returns the run's notify ID.
    pub async fn run_experiment(&self, experiment_id: &str) -> Result<String, ControlPlaneError> {
        let data: RunExperimentData = self
            .graphql(
                "runChaosExperiment",
                RUN_EXPERIMENT,
                json!({ "projectID": self.project_id()?, "experimentID": experiment_id }),
            )
            .await?;
        let notify_id = data.run_chaos_experiment.notify_id;
        if notify_id.is_empty() {
            return Err(ControlPlaneError::EmptyResponse {
                operation: "runChaosExperiment".to_string(),
            });
        }
        info!(experiment_id, notify_id = %notify_id, "Triggered experiment run");
        Ok(notify_id)
    }

    /// Runs of the given experiments, most recent first.
    pub async fn list_experiment_runs(
        &self,
        experiment_ids: &[String],
    ) -> Result<Vec<ExperimentRunSummary>, ControlPlaneError> {
        let data: ListRunsData = self
            .graphql(
                "listExperimentRun",
                LIST_EXPERIMENT_RUNS,
                json!({
                    "projectID": self.project_id()?,
                    "request": { "experimentIDs": experiment_ids },
                }),
            )
            .await?;
        debug!(
            total = data.list_experiment_run.total,
            returned = data.list_experiment_run.runs.len(),
            "Listed experiment runs"
        );
        Ok(data.list_experiment_run.runs)
    }

    pub async fn get_experiment_run(
        &self,
        run_id: &str,
    ) -> Result<ExperimentRunSummary, ControlPlaneError> {
        self.fetch_run(json!({
            "projectID": self.project_id()?,
            "experimentRunID": run_id,
        }))
        .await
    }

    pub async fn get_experiment_run_by_notify_id(
        &self,
        notify_id: &str,
    ) -> Result<ExperimentRunSummary, ControlPlaneError> {
        self.fetch_run(json!({
            "projectID": self.project_id()?,
            "notifyID": notify_id,
        }))
        .await
    }

    async fn fetch_run(&self, variables: Value) -> Result<ExperimentRunSummary, ControlPlaneError> {
        let data: GetRunData = self
            .graphql("getExperimentRun", GET_EXPERIMENT_RUN, variables)
            .await?;
        Ok(data.get_experiment_run)
    }

    /// Register a probe. Returns the name the control plane stored it under.
    pub async fn add_probe(&self, request: &ProbeRequest) -> Result<String, ControlPlaneError> {
        let data: AddProbeData = self
            .graphql(
                "addProbe",
                ADD_PROBE,
                json!({ "projectID": self.project_id()?, "request": request }),
            )
            .await?;
        info!(probe = %data.add_probe.name, "Registered probe");
        Ok(data.add_probe.name)
    }
}

async fn read_success_body(
    operation: &str,
    response: reqwest::Response,
    url: &str,
) -> Result<String, ControlPlaneError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ControlPlaneError::Http {
            url: url.to_string(),
            source,
        })?;
    if !status.is_success() {
        return Err(ControlPlaneError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    Ok(body)
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn logged_in(server: &MockServer) -> ControlPlaneClient {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "tok-1", "projectID": "proj-1"})),
            )
            .mount(server)
            .await;
        ControlPlaneClient::login(&server.uri(), "admin", "litmus")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_reads_token_and_project() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        assert_eq!(client.project_id().unwrap(), "proj-1");
        assert!(!format!("{client:?}").contains("tok-1"));
    }

    #[tokio::test]
    async fn test_login_without_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"projectID": "p"})))
            .mount(&server)
            .await;

        let err = ControlPlaneClient::login(&server.uri(), "admin", "bad")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::MissingToken));
    }

    #[tokio::test]
    async fn test_login_rejected_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let err = ControlPlaneClient::login(&server.uri(), "admin", "bad")
            .await
            .unwrap_err();
        match err {
            ControlPlaneError::Status { status, body, .. } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid credentials");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_graphql_sends_bearer_token() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(header("authorization", "Bearer tok-1"))
            .and(body_string_contains("runChaosExperiment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "runChaosExperiment": { "notifyID": "notify-9" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notify = client.run_experiment("exp-1").await.unwrap();
        assert_eq!(notify, "notify-9");
    }

    #[tokio::test]
    async fn test_graphql_errors_surface_first_message() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "mongo: no documents in result" }]
            })))
            .mount(&server)
            .await;

        let err = client.get_experiment_run("run-1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("getExperimentRun"));
    }

    #[tokio::test]
    async fn test_list_runs_and_infras() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_string_contains("listExperimentRun"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "listExperimentRun": {
                    "totalNoOfExperimentRuns": 1,
                    "experimentRuns": [{ "experimentRunID": "run-7", "experimentID": "exp-1", "phase": "Running" }]
                } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_string_contains("listInfras"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "listInfras": { "infras": [
                    { "infraID": "infra-1", "name": "ci", "isActive": true, "isInfraConfirmed": true }
                ] } }
            })))
            .mount(&server)
            .await;

        let runs = client
            .list_experiment_runs(&["exp-1".to_string()])
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].experiment_run_id, "run-7");

        let infras = client.list_infras().await.unwrap();
        assert!(infras[0].is_active);
    }

    #[tokio::test]
    async fn test_missing_data_is_empty_response() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
            .mount(&server)
            .await;

        let err = client.list_infras().await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::EmptyResponse { .. }));
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(matches!(
            normalize_endpoint("litmus.local:9091"),
            Err(ControlPlaneError::InvalidEndpoint(_))
        ));
        assert_eq!(
            normalize_endpoint(" http://litmus:9091/ ").unwrap(),
            "http://litmus:9091"
        );
    }

    #[test]
    fn test_with_token_requires_project_for_calls() {
        let client = ControlPlaneClient::with_token("http://cp", "tok", "").unwrap();
        assert!(matches!(
            client.project_id(),
            Err(ControlPlaneError::MissingProject)
        ));
        let client = client.with_project_id("proj-2");
        assert_eq!(client.project_id().unwrap(), "proj-2");
    }

    #[test]
    fn test_retry_classification() {
        let server_error = ControlPlaneError::Status {
            operation: "registerInfra".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(server_error.is_retryable());

        let client_error = ControlPlaneError::Status {
            operation: "registerInfra".to_string(),
            status: 400,
            body: String::new(),
        };
        assert!(!client_error.is_retryable());

        let graphql = ControlPlaneError::GraphQl {
            operation: "registerInfra".to_string(),
            message: "name already exists".to_string(),
        };
        assert!(!graphql.is_retryable());
        assert!(!graphql.is_not_found());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(10);
        let cut = truncate(&body, 5);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate("short", 10), "short");
    }
}
