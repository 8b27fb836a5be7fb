//! Status sources for the completion poller.
//!
//! A status source performs one read of something the harness is waiting on
//! and reports its current label. Sources never retry or sleep: pacing and
//! the timeout belong to [`crate::poll`].

pub mod cluster;
pub mod remote;

use std::future::Future;

use thiserror::Error;

use crate::poll::{PollRequest, PollResult, poll_until_cancelled, poll_until_terminal};

pub use cluster::{
    ChaosEngineState, ChaosResultPhase, DeploymentReadiness, EngineExperimentState, PodPhase,
    SelectedPodsPhase,
};
pub use remote::{ExperimentRunPhase, InfraActivity, RunLocator};

/// A failed status read. The poller treats every variant as transient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The resource exists (or will), but its status is not queryable yet.
    #[error("{resource} is not visible yet")]
    NotYetVisible { resource: String },

    #[error("Kubernetes API error reading {resource}: {message}")]
    Api { resource: String, message: String },

    #[error("control plane error reading {resource}: {message}")]
    Remote { resource: String, message: String },

    #[error("malformed status on {resource}: {detail}")]
    Malformed { resource: String, detail: String },
}

impl FetchError {
    /// Classify a Kubernetes client error for `kind`/`name`.
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            other => Self::Api {
                resource: format!("{kind}/{name}"),
                message: other.to_string(),
            },
        }
    }

    pub fn not_yet_visible(resource: impl Into<String>) -> Self {
        Self::NotYetVisible {
            resource: resource.into(),
        }
    }

    /// True for eventual-consistency misses (not found, not reported yet).
    pub fn is_not_yet_visible(&self) -> bool {
        matches!(self, Self::NotYetVisible { .. } | Self::NotFound { .. })
    }
}

/// One read of a watched resource's current state label.
pub trait StatusSource {
    /// Human-readable identity used in logs and errors.
    fn describe(&self) -> String;

    /// Read the current label. Must not retry or sleep.
    fn fetch_state(&self) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Poll `source` under `request`.
pub async fn poll_source<S: StatusSource>(source: &S, request: &PollRequest) -> PollResult {
    poll_until_terminal(request, || source.fetch_state()).await
}

/// Poll `source` under `request`, stopping early when `cancel` resolves.
pub async fn poll_source_until_cancelled<S, C>(
    source: &S,
    request: &PollRequest,
    cancel: C,
) -> PollResult
where
    S: StatusSource,
    C: Future<Output = ()>,
{
    poll_until_cancelled(request, || source.fetch_state(), cancel).await
}
