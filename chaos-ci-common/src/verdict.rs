//! Waits and verdict checks for a chaos run.
//!
//! Each wait is one completion poll over a status source followed by a
//! check of the terminal label. A poll that ends in a terminal state outside
//! the success set is reported as [`VerdictError::UnexpectedState`]; a poll
//! that never reaches a terminal state as [`VerdictError::Poll`].

use std::future::Future;
use std::time::Duration;

use kube::{Api, Client};
use thiserror::Error;
use tracing::info;

use crate::config::ExperimentDetails;
use crate::control_plane::ControlPlaneClient;
use crate::crd::{ChaosEngine, ChaosResult, chaos_result_name, runner_pod_name};
use crate::poll::{PollError, PollRequest, PollResult, StateSet, TerminalOutcome};
use crate::status::{
    ChaosEngineState, ChaosResultPhase, EngineExperimentState, ExperimentRunPhase, PodPhase,
    RunLocator, SelectedPodsPhase, poll_source, poll_source_until_cancelled,
};

/// Verdict both the ChaosResult and the engine must report.
pub const PASS: &str = "Pass";

pub const RUNNER_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const RUNNER_TIMEOUT: Duration = Duration::from_secs(300);

pub const APP_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const APP_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("{what}: {source}")]
    Poll { what: String, source: PollError },

    #[error("{what} ended in state {state}")]
    UnexpectedState { what: String, state: String },

    #[error("{what} verdict is {verdict:?}, expected \"Pass\"")]
    Verdict { what: String, verdict: String },

    #[error("{what} has no status")]
    MissingStatus { what: String },

    #[error("failed to read {what}: {source}")]
    Kube { what: String, source: kube::Error },
}

impl VerdictError {
    /// Last label seen before a poll gave up, or the terminal label reached.
    pub fn last_state(&self) -> Option<&str> {
        match self {
            Self::Poll { source, .. } => source.last_observed(),
            Self::UnexpectedState { state, .. } => Some(state),
            Self::Verdict { verdict, .. } => Some(verdict),
            Self::MissingStatus { .. } | Self::Kube { .. } => None,
        }
    }
}

/// Turn a finished poll into the terminal label, or an error when the poll
/// gave up or ended outside the success set.
pub fn require_success(what: &str, result: PollResult) -> Result<TerminalOutcome, VerdictError> {
    let outcome = result.into_outcome().map_err(|source| VerdictError::Poll {
        what: what.to_string(),
        source,
    })?;
    if !outcome.succeeded {
        return Err(VerdictError::UnexpectedState {
            what: what.to_string(),
            state: outcome.state,
        });
    }
    Ok(outcome)
}

pub fn check_verdict(what: &str, verdict: &str) -> Result<(), VerdictError> {
    info!(what, verdict, "Verdict");
    if verdict == PASS {
        Ok(())
    } else {
        Err(VerdictError::Verdict {
            what: what.to_string(),
            verdict: verdict.to_string(),
        })
    }
}

/// Wait until every pod of the target application is running.
pub async fn wait_app_running(client: &Client, details: &ExperimentDetails) -> Result<(), VerdictError> {
    let target = &details.target;
    let what = format!("application pods {} in {}", target.app_label, target.app_ns);
    let source = SelectedPodsPhase::new(client.clone(), &target.app_ns, target.app_label.clone());
    let request = PollRequest::new(what.clone(), StateSet::pod_running())
        .with_interval(APP_POLL_INTERVAL)
        .with_timeout(APP_TIMEOUT);
    require_success(&what, poll_source(&source, &request).await)?;
    info!(%what, "Application is running");
    Ok(())
}

/// Wait for the engine's runner pod to start running.
pub async fn wait_runner_running(client: &Client, details: &ExperimentDetails) -> Result<(), VerdictError> {
    let pod = runner_pod_name(&details.engine_name);
    let what = format!("runner pod {pod}");
    let source = PodPhase::new(client.clone(), &details.target.chaos_namespace, pod.clone());
    let request = PollRequest::new(pod, StateSet::pod_running())
        .with_interval(RUNNER_POLL_INTERVAL)
        .with_timeout(RUNNER_TIMEOUT);
    require_success(&what, poll_source(&source, &request).await)?;
    info!(%what, "Runner pod is running");
    Ok(())
}

/// Wait for the runner pod to exit successfully.
pub async fn wait_runner_completion(
    client: &Client,
    details: &ExperimentDetails,
) -> Result<(), VerdictError> {
    let pod = runner_pod_name(&details.engine_name);
    let what = format!("runner pod {pod}");
    let source = PodPhase::new(client.clone(), &details.target.chaos_namespace, pod.clone());
    let request = details
        .poll
        .native_request_for(pod, StateSet::pod_completed());
    require_success(&what, poll_source(&source, &request).await)?;
    info!(%what, "Runner pod completed");
    Ok(())
}

/// Wait until the engine records a running (or finished) chaos pod.
pub async fn wait_chaos_pod_started(
    client: &Client,
    details: &ExperimentDetails,
) -> Result<(), VerdictError> {
    let engine = &details.engine_name;
    let what = format!("chaos pod of engine {engine}");
    let source = EngineExperimentState::new(client.clone(), &details.target.chaos_namespace, engine.clone());
    let request = details
        .poll
        .native_request_for(engine.clone(), StateSet::chaos_pod_started());
    require_success(&what, poll_source(&source, &request).await)?;
    info!(%what, "Chaos pod started");
    Ok(())
}

pub async fn wait_engine_completion(
    client: &Client,
    details: &ExperimentDetails,
) -> Result<(), VerdictError> {
    let engine = &details.engine_name;
    let what = format!("ChaosEngine {engine}");
    let source = ChaosEngineState::new(client.clone(), &details.target.chaos_namespace, engine.clone());
    let request = details
        .poll
        .native_request_for(engine.clone(), StateSet::chaos_engine());
    require_success(&what, poll_source(&source, &request).await)?;
    Ok(())
}

/// Wait for the ChaosResult to complete and require a `Pass` verdict.
pub async fn chaos_result_verdict(
    client: &Client,
    details: &ExperimentDetails,
) -> Result<(), VerdictError> {
    let namespace = &details.target.chaos_namespace;
    let name = chaos_result_name(&details.engine_name, &details.experiment_name);
    let what = format!("ChaosResult {name}");

    let source = ChaosResultPhase::new(client.clone(), namespace, name.clone());
    let request = details
        .poll
        .native_request_for(name.clone(), StateSet::chaos_result());
    require_success(&what, poll_source(&source, &request).await)?;

    let api: Api<ChaosResult> = Api::namespaced(client.clone(), namespace);
    let result = api.get(&name).await.map_err(|source| VerdictError::Kube {
        what: what.clone(),
        source,
    })?;
    let status = result
        .status
        .ok_or_else(|| VerdictError::MissingStatus { what: what.clone() })?;
    check_verdict(&what, &status.experiment_status.verdict)
}

/// Wait for the engine to complete and require a `Pass` verdict on its
/// first experiment.
pub async fn chaos_engine_verdict(
    client: &Client,
    details: &ExperimentDetails,
) -> Result<(), VerdictError> {
    wait_engine_completion(client, details).await?;

    let engine = &details.engine_name;
    let what = format!("ChaosEngine {engine}");
    let api: Api<ChaosEngine> = Api::namespaced(client.clone(), &details.target.chaos_namespace);
    let current = api.get(engine).await.map_err(|source| VerdictError::Kube {
        what: what.clone(),
        source,
    })?;
    let verdict = engine_verdict(&current)
        .ok_or_else(|| VerdictError::MissingStatus { what: what.clone() })?;
    check_verdict(&what, verdict)
}

/// Verdict recorded for the first experiment of `engine`.
pub fn engine_verdict(engine: &ChaosEngine) -> Option<&str> {
    engine
        .status
        .as_ref()
        .and_then(|s| s.experiments.first())
        .map(|e| e.verdict.as_str())
}

/// Poll a remote run until it finishes and require `Completed`.
///
/// `cancel` stops the wait early; pass [`std::future::pending`] to wait for
/// the timeout only.
pub async fn wait_remote_run<C>(
    client: &ControlPlaneClient,
    locator: RunLocator,
    request: &PollRequest,
    cancel: C,
) -> Result<TerminalOutcome, VerdictError>
where
    C: Future<Output = ()>,
{
    let what = locator.to_string();
    let source = ExperimentRunPhase::new(client.clone(), locator);
    let result = poll_source_until_cancelled(&source, request, cancel).await;
    let outcome = require_success(&what, result)?;
    info!(%what, state = %outcome.state, "Experiment run completed");
    Ok(outcome)
}
