//! Installing and removing the chaos operator and experiment charts.

use std::io::Write;
use std::time::Duration;

use kube::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ExperimentDetails;
use crate::exec::{self, ExecError};
use crate::poll::{PollError, PollRequest, StateSet};
use crate::status::{DeploymentReadiness, poll_source};

/// Namespace the operator manifest installs into.
pub const OPERATOR_NAMESPACE: &str = "litmus";

pub const HELM_REPO_NAME: &str = "litmuschaos";
pub const HELM_REPO_URL: &str = "https://litmuschaos.github.io/litmus-helm/";
pub const EXPERIMENTS_CHART: &str = "litmuschaos/kubernetes-chaos";
pub const EXPERIMENTS_RELEASE: &str = "k8s";

const OPERATOR_READY_INTERVAL: Duration = Duration::from_secs(5);
const OPERATOR_READY_TIMEOUT: Duration = Duration::from_secs(250);

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("operator deployment {name} is not ready: {source}")]
    OperatorNotReady { name: String, source: PollError },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("failed to stage {what}: {source}")]
    Stage {
        what: String,
        source: std::io::Error,
    },
}

/// Apply the operator manifest, wait for the operator, then install the
/// experiment chart.
pub async fn install_litmus(client: &Client, details: &ExperimentDetails) -> Result<(), InstallError> {
    let url = &details.hub.install_litmus_url;
    info!(%url, "Installing chaos operator");
    exec::kubectl(["apply", "-f", url.as_str()]).await?;

    let operator = &details.target.operator_name;
    let source = DeploymentReadiness::new(client.clone(), OPERATOR_NAMESPACE, operator.clone());
    let request = PollRequest::new(format!("Deployment/{operator}"), StateSet::deployment_ready())
        .with_interval(OPERATOR_READY_INTERVAL)
        .with_timeout(OPERATOR_READY_TIMEOUT);
    poll_source(&source, &request)
        .await
        .into_outcome()
        .map_err(|source| InstallError::OperatorNotReady {
            name: operator.clone(),
            source,
        })?;
    info!(operator = %operator, "Chaos operator is ready");

    let namespace = &details.target.chaos_namespace;
    exec::helm(["repo", "add", HELM_REPO_NAME, HELM_REPO_URL, "--force-update"]).await?;
    exec::helm(["repo", "update"]).await?;
    exec::helm(helm_install_args(namespace)).await?;
    info!(release = EXPERIMENTS_RELEASE, %namespace, "Installed chaos experiments");
    Ok(())
}

/// Arguments that install (or upgrade) the experiments chart into `namespace`.
pub fn helm_install_args(namespace: &str) -> Vec<String> {
    [
        "upgrade",
        "--install",
        EXPERIMENTS_RELEASE,
        EXPERIMENTS_CHART,
        "--namespace",
        namespace,
        "--create-namespace",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Outcome of one uninstall step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: &'static str,
    pub error: Option<String>,
}

/// Every uninstall step, in the order run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub steps: Vec<StepOutcome>,
}

impl UninstallReport {
    fn record(&mut self, step: &'static str, result: Result<exec::CommandOutput, ExecError>) {
        let error = match result {
            Ok(_) => {
                info!(step, "Uninstall step done");
                None
            }
            Err(e) => {
                warn!(step, error = %e, "Uninstall step failed");
                Some(e.to_string())
            }
        };
        self.steps.push(StepOutcome { step, error });
    }

    pub fn all_succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

/// Remove engines, the experiment chart and the operator. Every step runs
/// even when an earlier one failed.
pub async fn uninstall_litmus(details: &ExperimentDetails) -> UninstallReport {
    let mut report = UninstallReport::default();
    let namespace = details.target.chaos_namespace.as_str();

    report.record(
        "delete chaosengines",
        exec::kubectl(["delete", "chaosengine", "--all", "--all-namespaces"]).await,
    );
    report.record(
        "helm uninstall",
        exec::helm(["uninstall", EXPERIMENTS_RELEASE, "--namespace", namespace]).await,
    );
    report.record(
        "delete chaos resources",
        exec::kubectl([
            "delete",
            "chaosengine,chaosexperiment,chaosresult",
            "--all",
            "--all-namespaces",
        ])
        .await,
    );
    report.record(
        "delete operator",
        exec::kubectl([
            "delete",
            "-f",
            details.hub.install_litmus_url.as_str(),
            "--ignore-not-found",
        ])
        .await,
    );
    report
}

/// RBAC manifest from `url` with its namespace switched to `namespace`.
pub async fn fetch_rbac(url: &str, namespace: &str) -> Result<String, InstallError> {
    let download = |message: String| InstallError::Download {
        url: url.to_string(),
        message,
    };
    let response = reqwest::get(url).await.map_err(|e| download(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(download(format!("HTTP {}", status.as_u16())));
    }
    let body = response.text().await.map_err(|e| download(e.to_string()))?;
    Ok(rewrite_rbac_namespace(&body, namespace))
}

pub fn rewrite_rbac_namespace(manifest: &str, namespace: &str) -> String {
    manifest.replace("namespace: default", &format!("namespace: {namespace}"))
}

/// Install the service account and roles `experiment` runs under.
pub async fn install_rbac(url: &str, namespace: &str, experiment: &str) -> Result<(), InstallError> {
    let manifest = fetch_rbac(url, namespace).await?;
    let stage = |source| InstallError::Stage {
        what: format!("{experiment} RBAC"),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{experiment}-sa-"))
        .suffix(".yaml")
        .tempfile()
        .map_err(stage)?;
    file.write_all(manifest.as_bytes()).map_err(stage)?;
    file.flush().map_err(stage)?;

    let path = file.path().to_string_lossy().into_owned();
    let output = exec::kubectl(["apply", "-f", path.as_str()]).await?;
    info!(experiment, %namespace, result = %output.stdout.trim(), "Installed RBAC");
    Ok(())
}
