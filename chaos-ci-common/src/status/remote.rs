//! Status sources backed by the control plane.
//!
//! A run is only queryable some time after it was triggered; until then the
//! control plane either lists nothing or answers "not found". Both surface as
//! [`FetchError::NotYetVisible`] so the poller keeps waiting.

use std::fmt;

use super::{FetchError, StatusSource};
use crate::control_plane::{ControlPlaneClient, ControlPlaneError};
use crate::control_plane::types::ExperimentRunSummary;
use crate::poll::states::{INFRA_ACTIVE, INFRA_INACTIVE};

/// How a remote experiment run is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLocator {
    RunId(String),
    NotifyId(String),
    /// Most recent run of a saved experiment.
    LatestOfExperiment(String),
}

impl fmt::Display for RunLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunId(id) => write!(f, "experiment run {id}"),
            Self::NotifyId(id) => write!(f, "experiment run (notify {id})"),
            Self::LatestOfExperiment(id) => write!(f, "latest run of experiment {id}"),
        }
    }
}

fn classify(resource: &str, err: ControlPlaneError) -> FetchError {
    if err.is_not_found() {
        FetchError::not_yet_visible(resource)
    } else {
        FetchError::Remote {
            resource: resource.to_string(),
            message: err.to_string(),
        }
    }
}

/// Phase label of a run, or not-yet-visible when the run has no phase yet.
pub fn run_phase(run: Option<&ExperimentRunSummary>, resource: &str) -> Result<String, FetchError> {
    match run {
        Some(run) if !run.phase.is_empty() => Ok(run.phase.clone()),
        _ => Err(FetchError::not_yet_visible(resource)),
    }
}

/// Watches the phase of a remote experiment run.
#[derive(Debug, Clone)]
pub struct ExperimentRunPhase {
    client: ControlPlaneClient,
    locator: RunLocator,
}

impl ExperimentRunPhase {
    pub fn new(client: ControlPlaneClient, locator: RunLocator) -> Self {
        Self { client, locator }
    }

    pub fn locator(&self) -> &RunLocator {
        &self.locator
    }
}

impl StatusSource for ExperimentRunPhase {
    fn describe(&self) -> String {
        self.locator.to_string()
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let resource = self.describe();
        let run = match &self.locator {
            RunLocator::RunId(id) => self
                .client
                .get_experiment_run(id)
                .await
                .map(Some)
                .map_err(|e| classify(&resource, e))?,
            RunLocator::NotifyId(id) => self
                .client
                .get_experiment_run_by_notify_id(id)
                .await
                .map(Some)
                .map_err(|e| classify(&resource, e))?,
            RunLocator::LatestOfExperiment(id) => self
                .client
                .list_experiment_runs(std::slice::from_ref(id))
                .await
                .map_err(|e| classify(&resource, e))?
                .into_iter()
                .next(),
        };
        run_phase(run.as_ref(), &resource)
    }
}

/// Watches whether a registered infra has connected.
#[derive(Debug, Clone)]
pub struct InfraActivity {
    client: ControlPlaneClient,
    infra_id: String,
}

impl InfraActivity {
    pub fn new(client: ControlPlaneClient, infra_id: impl Into<String>) -> Self {
        Self {
            client,
            infra_id: infra_id.into(),
        }
    }
}

impl StatusSource for InfraActivity {
    fn describe(&self) -> String {
        format!("infrastructure {}", self.infra_id)
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        let resource = self.describe();
        let infras = self
            .client
            .list_infras()
            .await
            .map_err(|e| classify(&resource, e))?;
        let infra = infras
            .iter()
            .find(|infra| infra.infra_id == self.infra_id)
            .ok_or_else(|| FetchError::not_yet_visible(resource))?;
        Ok(if infra.is_active { INFRA_ACTIVE } else { INFRA_INACTIVE }.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{PollRequest, StateSet};
    use crate::status::poll_source;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ControlPlaneClient {
        ControlPlaneClient::with_token(&server.uri(), "tok", "proj").unwrap()
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(RunLocator::RunId("r1".into()).to_string(), "experiment run r1");
        assert_eq!(
            RunLocator::LatestOfExperiment("e1".into()).to_string(),
            "latest run of experiment e1"
        );
    }

    #[test]
    fn test_run_phase_empty_is_not_yet_visible() {
        assert!(run_phase(None, "r").unwrap_err().is_not_yet_visible());
        let run = ExperimentRunSummary {
            experiment_run_id: "r".into(),
            experiment_id: "e".into(),
            notify_id: None,
            phase: String::new(),
            resiliency_score: None,
        };
        assert!(run_phase(Some(&run), "r").unwrap_err().is_not_yet_visible());
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_yet_visible() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "listExperimentRun": { "totalNoOfExperimentRuns": 0, "experimentRuns": [] } }
            })))
            .mount(&server)
            .await;

        let source = ExperimentRunPhase::new(
            client_for(&server),
            RunLocator::LatestOfExperiment("exp-1".into()),
        );
        let err = source.fetch_state().await.unwrap_err();
        assert!(err.is_not_yet_visible());
    }

    #[tokio::test]
    async fn test_not_found_run_is_not_yet_visible() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "experiment run not found" }]
            })))
            .mount(&server)
            .await;

        let source = ExperimentRunPhase::new(client_for(&server), RunLocator::NotifyId("n-1".into()));
        assert!(source.fetch_state().await.unwrap_err().is_not_yet_visible());
    }

    #[tokio::test]
    async fn test_server_error_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let source = ExperimentRunPhase::new(client_for(&server), RunLocator::RunId("r-1".into()));
        let err = source.fetch_state().await.unwrap_err();
        assert!(matches!(err, FetchError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_run_phase_polls_to_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "getExperimentRun": { "experimentRunID": "r-1", "phase": "Running" } }
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "getExperimentRun": { "experimentRunID": "r-1", "phase": "Completed" } }
            })))
            .mount(&server)
            .await;

        let source = ExperimentRunPhase::new(client_for(&server), RunLocator::RunId("r-1".into()));
        let request = PollRequest::new(source.describe(), StateSet::experiment_run())
            .with_interval(Duration::from_millis(20))
            .with_timeout(Duration::from_secs(10));

        let result = poll_source(&source, &request).await;
        assert!(result.succeeded());
        assert_eq!(result.final_state(), "Completed");
        assert_eq!(result.attempts(), 3);
    }

    #[tokio::test]
    async fn test_infra_activity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_string_contains("listInfras"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "listInfras": { "infras": [
                    { "infraID": "a", "name": "a", "isActive": false },
                    { "infraID": "b", "name": "b", "isActive": true }
                ] } }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(
            InfraActivity::new(client.clone(), "a").fetch_state().await.unwrap(),
            INFRA_INACTIVE
        );
        assert_eq!(
            InfraActivity::new(client.clone(), "b").fetch_state().await.unwrap(),
            INFRA_ACTIVE
        );
        assert!(
            InfraActivity::new(client, "missing")
                .fetch_state()
                .await
                .unwrap_err()
                .is_not_yet_visible()
        );
    }
}
