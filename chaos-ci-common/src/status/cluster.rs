//! Status sources backed by the Kubernetes API.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use super::{FetchError, StatusSource};
use crate::crd::{ChaosEngine, ChaosResult};
use crate::poll::states::{DEPLOYMENT_PROGRESSING, DEPLOYMENT_READY};

/// `status.engineStatus` of a ChaosEngine.
pub fn engine_state(engine: &ChaosEngine, name: &str) -> Result<String, FetchError> {
    match engine.status.as_ref().map(|s| s.engine_status.as_str()) {
        Some(state) if !state.is_empty() => Ok(state.to_string()),
        _ => Err(FetchError::not_yet_visible(format!(
            "engineStatus of ChaosEngine {name}"
        ))),
    }
}

/// Status of the first experiment on a ChaosEngine, once its pod exists.
pub fn engine_experiment_state(engine: &ChaosEngine, name: &str) -> Result<String, FetchError> {
    let experiment = engine
        .status
        .as_ref()
        .and_then(|s| s.experiments.first())
        .ok_or_else(|| FetchError::not_yet_visible(format!("experiments of ChaosEngine {name}")))?;
    if experiment.exp_pod.is_empty() {
        return Err(FetchError::not_yet_visible(format!(
            "experiment pod of ChaosEngine {name}"
        )));
    }
    if experiment.status.is_empty() {
        return Err(FetchError::not_yet_visible(format!(
            "experiment status of ChaosEngine {name}"
        )));
    }
    Ok(experiment.status.clone())
}

/// `status.experimentStatus.phase` of a ChaosResult.
pub fn result_phase(result: &ChaosResult, name: &str) -> Result<String, FetchError> {
    match result.status.as_ref().map(|s| s.experiment_status.phase.as_str()) {
        Some(phase) if !phase.is_empty() => Ok(phase.to_string()),
        _ => Err(FetchError::not_yet_visible(format!(
            "phase of ChaosResult {name}"
        ))),
    }
}

/// `status.phase` of a Pod.
pub fn pod_phase(pod: &Pod, name: &str) -> Result<String, FetchError> {
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some(phase) if !phase.is_empty() => Ok(phase.to_string()),
        _ => Err(FetchError::Malformed {
            resource: format!("Pod/{name}"),
            detail: "no status.phase".to_string(),
        }),
    }
}

/// `Ready` once the deployment reports no unavailable replica.
pub fn deployment_readiness(deployment: &Deployment, name: &str) -> Result<String, FetchError> {
    let status = deployment
        .status
        .as_ref()
        .ok_or_else(|| FetchError::not_yet_visible(format!("status of Deployment {name}")))?;
    let unavailable = status.unavailable_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    if unavailable == 0 && ready > 0 {
        Ok(DEPLOYMENT_READY.to_string())
    } else {
        Ok(DEPLOYMENT_PROGRESSING.to_string())
    }
}

/// Watches `status.engineStatus` of a ChaosEngine.
#[derive(Clone)]
pub struct ChaosEngineState {
    api: Api<ChaosEngine>,
    name: String,
}

impl ChaosEngineState {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

impl StatusSource for ChaosEngineState {
    fn describe(&self) -> String {
        format!("ChaosEngine {}", self.name)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let engine = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| FetchError::from_kube("ChaosEngine", &self.name, e))?;
        engine_state(&engine, &self.name)
    }
}

/// Watches the chaos pod status recorded on a ChaosEngine.
#[derive(Clone)]
pub struct EngineExperimentState {
    api: Api<ChaosEngine>,
    name: String,
}

impl EngineExperimentState {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

impl StatusSource for EngineExperimentState {
    fn describe(&self) -> String {
        format!("chaos pod of ChaosEngine {}", self.name)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let engine = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| FetchError::from_kube("ChaosEngine", &self.name, e))?;
        engine_experiment_state(&engine, &self.name)
    }
}

/// Watches the phase of a ChaosResult.
#[derive(Clone)]
pub struct ChaosResultPhase {
    api: Api<ChaosResult>,
    name: String,
}

impl ChaosResultPhase {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

impl StatusSource for ChaosResultPhase {
    fn describe(&self) -> String {
        format!("ChaosResult {}", self.name)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let result = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| FetchError::from_kube("ChaosResult", &self.name, e))?;
        result_phase(&result, &self.name)
    }
}

/// Watches the phase of a Pod.
#[derive(Clone)]
pub struct PodPhase {
    api: Api<Pod>,
    name: String,
}

impl PodPhase {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

impl StatusSource for PodPhase {
    fn describe(&self) -> String {
        format!("Pod {}", self.name)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let pod = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| FetchError::from_kube("Pod", &self.name, e))?;
        pod_phase(&pod, &self.name)
    }
}

const POD_RUNNING: &str = "Running";

/// Combined phase of the pods a label selector matches: `Running` once all
/// of them run, otherwise the phase of the first one that does not.
pub fn selected_pods_phase(pods: &[Pod], selector: &str) -> Result<String, FetchError> {
    if pods.is_empty() {
        return Err(FetchError::not_yet_visible(format!("pods matching {selector}")));
    }
    for pod in pods {
        let phase = pod_phase(pod, &pod.name_any())?;
        if phase != POD_RUNNING {
            return Ok(phase);
        }
    }
    Ok(POD_RUNNING.to_string())
}

/// Watches every pod matching a label selector, e.g. the target
/// application before chaos starts.
#[derive(Clone)]
pub struct SelectedPodsPhase {
    api: Api<Pod>,
    selector: String,
}

impl SelectedPodsPhase {
    pub fn new(client: Client, namespace: &str, selector: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            selector: selector.into(),
        }
    }
}

impl StatusSource for SelectedPodsPhase {
    fn describe(&self) -> String {
        format!("pods {}", self.selector)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let pods = self
            .api
            .list(&ListParams::default().labels(&self.selector))
            .await
            .map_err(|e| FetchError::from_kube("Pod", &self.selector, e))?;
        selected_pods_phase(&pods.items, &self.selector)
    }
}

/// Watches replica availability of a Deployment.
#[derive(Clone)]
pub struct DeploymentReadiness {
    api: Api<Deployment>,
    name: String,
}

impl DeploymentReadiness {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

impl StatusSource for DeploymentReadiness {
    fn describe(&self) -> String {
        format!("Deployment {}", self.name)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let deployment = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| FetchError::from_kube("Deployment", &self.name, e))?;
        deployment_readiness(&deployment, &self.name)
    }
}
