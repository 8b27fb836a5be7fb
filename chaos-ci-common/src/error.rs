//! Crate-wide error type.
//!
//! Each concern keeps its own error enum; [`ChaosCiError`] gathers them for
//! callers that drive a whole run.

use thiserror::Error;

use crate::config::EnvError;
use crate::control_plane::ControlPlaneError;
use crate::exec::ExecError;
use crate::infra::InfraError;
use crate::install::InstallError;
use crate::kube_client::KubeClientError;
use crate::logging::LoggingError;
use crate::logs::LogsError;
use crate::manifest::ManifestError;
use crate::poll::PollError;
use crate::status::FetchError;
use crate::verdict::VerdictError;

#[derive(Debug, Error)]
pub enum ChaosCiError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] EnvError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Verdict(#[from] VerdictError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Logs(#[from] LogsError),

    #[error(transparent)]
    KubeClient(#[from] KubeClientError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl ChaosCiError {
    /// True when the run finished but did not pass, as opposed to the
    /// harness failing to observe it.
    pub fn is_verdict_failure(&self) -> bool {
        matches!(
            self,
            Self::Verdict(VerdictError::UnexpectedState { .. } | VerdictError::Verdict { .. })
        )
    }
}

pub type Result<T, E = ChaosCiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_message() {
        let err: ChaosCiError = ManifestError::UnknownFault("pod-explode".to_string()).into();
        assert_eq!(err.to_string(), "unknown fault \"pod-explode\"");
        assert!(!err.is_verdict_failure());

        let verdict: ChaosCiError = VerdictError::Verdict {
            what: "ChaosResult e-pod-delete".to_string(),
            verdict: "Fail".to_string(),
        }
        .into();
        assert!(verdict.is_verdict_failure());
    }
}
