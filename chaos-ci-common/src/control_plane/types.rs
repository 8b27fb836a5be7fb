//! Request and response payloads exchanged with the control plane.

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "projectID")]
    pub project_id: Option<String>,
}

/// Generic GraphQL envelope.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInfraRequest {
    pub name: String,
    pub description: String,
    #[serde(rename = "environmentID")]
    pub environment_id: String,
    pub platform_name: String,
    pub infra_namespace: String,
    pub service_account: String,
    pub infra_scope: String,
    pub infra_ns_exists: bool,
    pub infra_sa_exists: bool,
    pub skip_ssl: bool,
    pub infrastructure_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// Kubernetes toleration applied to the infra agent pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Infra created by `registerInfra`, with the agent manifest to apply.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredInfra {
    #[serde(rename = "infraID")]
    pub infra_id: String,
    pub manifest: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfraSummary {
    #[serde(rename = "infraID")]
    pub infra_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_infra_confirmed: bool,
}

/// Kind of environment an infra is registered under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    Prod,
    #[default]
    NonProd,
}

impl EnvironmentType {
    /// Parse `PROD` / `NON_PROD`; anything else is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PROD" => Some(Self::Prod),
            "NON_PROD" => Some(Self::NonProd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvironmentRequest {
    #[serde(rename = "environmentID")]
    pub environment_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EnvironmentType,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRef {
    #[serde(rename = "environmentID")]
    pub environment_id: String,
    #[serde(default)]
    pub name: String,
}

/// Experiment definition saved before it can be run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaveExperimentRequest {
    pub id: String,
    pub name: String,
    #[serde(rename = "infraID")]
    pub infra_id: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Workflow document serialized as JSON.
    pub manifest: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunExperimentResponse {
    #[serde(rename = "notifyID")]
    pub notify_id: String,
}

/// A run as reported by `listExperimentRun` / `getExperimentRun`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRunSummary {
    #[serde(rename = "experimentRunID", default)]
    pub experiment_run_id: String,
    #[serde(rename = "experimentID", default)]
    pub experiment_id: String,
    #[serde(rename = "notifyID", default)]
    pub notify_id: Option<String>,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub resiliency_score: Option<f64>,
}

/// HTTP probe registered with the control plane and referenced from engines.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub infrastructure_type: String,
    pub tags: Vec<String>,
    #[serde(rename = "kubernetesHTTPProperties")]
    pub http_properties: HttpProbeProperties,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbeProperties {
    pub probe_timeout: String,
    pub interval: String,
    pub attempt: u32,
    pub url: String,
    pub method: HttpProbeMethod,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HttpProbeMethod {
    pub get: HttpGetCriteria,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetCriteria {
    pub criteria: String,
    pub response_code: String,
}
