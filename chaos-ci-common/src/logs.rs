//! Chaos and helper pod logs, collected when a run fails.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ExperimentDetails;
use crate::crd::ChaosEngine;
use crate::poll::{PollRequest, PollResult, StateSet};
use crate::status::{PodPhase, StatusSource, poll_source_until_cancelled};

const CHAOS_POD_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Label the operator puts on helper pods, holding the engine UID.
pub const CHAOS_UID_LABEL: &str = "chaosUID";

#[derive(Debug, Error)]
pub enum LogsError {
    #[error("failed to read {what}: {source}")]
    Kube { what: String, source: kube::Error },

    #[error("ChaosEngine {0} has no chaos pod recorded")]
    NoChaosPod(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLogs {
    pub pod: String,
    pub logs: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaosLogs {
    pub chaos_pod: Option<PodLogs>,
    pub helpers: Vec<PodLogs>,
    /// Helper pods whose logs could not be read, with the reason.
    pub unreadable: Vec<(String, String)>,
}

/// Helper pods of `experiment` that belong to the engine with `uid`.
pub fn helper_pod_names(pods: &[Pod], experiment: &str, uid: &str) -> Vec<String> {
    let prefix = format!("{experiment}-helper");
    pods.iter()
        .filter(|pod| pod.name_any().contains(&prefix))
        .filter(|pod| pod.labels().get(CHAOS_UID_LABEL).map(String::as_str) == Some(uid))
        .map(|pod| pod.name_any())
        .collect()
}

async fn read_logs(api: &Api<Pod>, pod: &str) -> Result<PodLogs, LogsError> {
    let logs = api
        .logs(pod, &LogParams::default())
        .await
        .map_err(|source| LogsError::Kube {
            what: format!("logs of pod {pod}"),
            source,
        })?;
    Ok(PodLogs {
        pod: pod.to_string(),
        logs,
    })
}

async fn find_engine(client: &Client, details: &ExperimentDetails) -> Result<ChaosEngine, LogsError> {
    let name = &details.engine_name;
    let primary: Api<ChaosEngine> = Api::namespaced(client.clone(), &details.target.chaos_namespace);
    match primary.get(name).await {
        Ok(engine) => Ok(engine),
        Err(first) => {
            warn!(engine = %name, error = %first, "Engine not in chaos namespace, trying app namespace");
            let fallback: Api<ChaosEngine> = Api::namespaced(client.clone(), &details.target.app_ns);
            fallback.get(name).await.map_err(|source| LogsError::Kube {
                what: format!("ChaosEngine {name}"),
                source,
            })
        }
    }
}

/// Wait for the chaos pod to finish, giving up early when `cancel` resolves.
async fn await_chaos_pod<S, C>(source: &S, timeout: Duration, cancel: C) -> PollResult
where
    S: StatusSource,
    C: Future<Output = ()>,
{
    let request = PollRequest::new(source.describe(), StateSet::pod_completed())
        .with_interval(CHAOS_POD_POLL_INTERVAL)
        .with_timeout(timeout);
    let waited = poll_source_until_cancelled(source, &request, cancel).await;
    if let Some(err) = waited.error() {
        warn!(pod = %request.resource_id, error = %err, "Collecting logs of unfinished chaos pod");
    }
    waited
}

/// Wait for the chaos pod to finish, then collect its logs and, unless
/// helper pods are cleaned up, those of its helpers.
///
/// The wait ends at `EXPERIMENT_TIMEOUT` or when `cancel` resolves; an
/// already-resolved `cancel` reads the logs straight away.
pub async fn chaos_pod_logs<C>(
    client: &Client,
    details: &ExperimentDetails,
    cancel: C,
) -> Result<ChaosLogs, LogsError>
where
    C: Future<Output = ()>,
{
    let engine = find_engine(client, details).await?;
    let chaos_pod = engine
        .status
        .as_ref()
        .and_then(|s| s.experiments.first())
        .map(|e| e.exp_pod.clone())
        .filter(|pod| !pod.is_empty())
        .ok_or_else(|| LogsError::NoChaosPod(details.engine_name.clone()))?;
    let namespace = &details.target.chaos_namespace;

    let source = PodPhase::new(client.clone(), namespace, chaos_pod.clone());
    await_chaos_pod(&source, details.poll.experiment_timeout, cancel).await;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let mut collected = ChaosLogs {
        chaos_pod: Some(read_logs(&pods, &chaos_pod).await?),
        ..Default::default()
    };

    if details.target.job_cleanup_policy == "delete" {
        info!("Helper pods are deleted after the run, skipping their logs");
        return Ok(collected);
    }
    let Some(uid) = engine.uid() else {
        warn!(engine = %details.engine_name, "Engine has no UID, skipping helper logs");
        return Ok(collected);
    };

    let listed = pods
        .list(&ListParams::default())
        .await
        .map_err(|source| LogsError::Kube {
            what: format!("pods in {namespace}"),
            source,
        })?;
    for helper in helper_pod_names(&listed.items, &details.experiment_name, &uid) {
        match read_logs(&pods, &helper).await {
            Ok(logs) => collected.helpers.push(logs),
            Err(err) => {
                warn!(pod = %helper, error = %err, "Failed to read helper pod logs");
                collected.unreadable.push((helper, err.to_string()));
            }
        }
    }
    Ok(collected)
}
