//! Typed Litmus custom resources (`litmuschaos.io/v1alpha1`).
//!
//! Only the fields the harness writes or reads are modelled; unknown fields
//! in API responses are ignored.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Engine state requested by the client. `stop` aborts a running engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Active,
    Stop,
}

/// Desired state of a ChaosEngine.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "litmuschaos.io",
    version = "v1alpha1",
    kind = "ChaosEngine",
    namespaced,
    status = "ChaosEngineStatus",
    shortname = "ce"
)]
#[serde(rename_all = "camelCase")]
pub struct ChaosEngineSpec {
    pub appinfo: ApplicationParams,
    /// Litmus expects the string form ("true"/"false").
    pub annotation_check: String,
    pub engine_state: EngineState,
    pub chaos_service_account: String,
    #[serde(rename = "jobCleanUpPolicy")]
    pub job_cleanup_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<EngineComponents>,
    pub experiments: Vec<ExperimentList>,
}

/// Target application of the chaos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApplicationParams {
    pub appns: String,
    pub applabel: String,
    pub appkind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineComponents {
    pub runner: RunnerInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInfo {
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentList {
    pub name: String,
    pub spec: ExperimentAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentAttributes {
    pub components: ExperimentComponents,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probe: Vec<ProbeRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentComponents {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvPair>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub experiment_image: String,
}

/// One `name`/`value` environment entry passed to the experiment pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvPair {
    pub name: String,
    pub value: String,
}

impl EnvPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reference to a probe registered with the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProbeRef {
    pub name: String,
    pub mode: String,
}

/// Observed state of a ChaosEngine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChaosEngineStatus {
    /// `initialized`, `completed` or `stopped`.
    #[serde(default)]
    pub engine_status: String,
    #[serde(default)]
    pub experiments: Vec<ExperimentStatuses>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatuses {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub runner: String,
    #[serde(default, rename = "experimentPod")]
    pub exp_pod: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub verdict: String,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

/// Desired state of a ChaosResult. Written by the chaos operator, read by us.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "litmuschaos.io",
    version = "v1alpha1",
    kind = "ChaosResult",
    namespaced,
    status = "ChaosResultStatus"
)]
pub struct ChaosResultSpec {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub experiment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChaosResultStatus {
    #[serde(default)]
    pub experiment_status: TestStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestStatus {
    /// `Running`, `Completed`, `Stopped`, ...
    #[serde(default)]
    pub phase: String,
    /// `Awaited`, `Pass`, `Fail`, `Stopped`.
    #[serde(default)]
    pub verdict: String,
    #[serde(default)]
    pub fail_step: String,
    #[serde(default)]
    pub probe_success_percentage: String,
}

/// Name the chaos operator gives the ChaosResult of `experiment` run by `engine`.
pub fn chaos_result_name(engine: &str, experiment: &str) -> String {
    format!("{engine}-{experiment}")
}

/// Name of the runner pod the operator creates for `engine`.
pub fn runner_pod_name(engine: &str) -> String {
    format!("{engine}-runner")
}
