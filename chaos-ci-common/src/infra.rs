//! Control-plane infrastructure: environment, registration, activation and
//! teardown.
//!
//! Registration hands back an agent manifest. Applying it to the cluster
//! makes the infra connect back to the control plane, which is observed by
//! polling [`InfraActivity`] until it reports `Active`.

use std::io::Write;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EnvironmentSettings, InfraSettings};
use crate::control_plane::types::{CreateEnvironmentRequest, RegisterInfraRequest, Toleration};
use crate::control_plane::{ControlPlaneClient, ControlPlaneError};
use crate::exec::{self, ExecError};
use crate::naming;
use crate::poll::{PollError, PollRequest, StateSet};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::status::{InfraActivity, poll_source};

/// CRDs the infra agent expects to find on the cluster.
pub const PORTAL_CRDS_URL: &str =
    "https://raw.githubusercontent.com/litmuschaos/litmus/master/mkdocs/docs/3.6.1/litmus-portal-crds-3.6.1.yml";

/// Server address registration manifests carry when the control plane was
/// reached through a port-forward.
pub const LOCAL_SERVER_ADDR: &str = "http://localhost:9091";

/// In-cluster address of the control-plane frontend.
pub const FRONTEND_SERVICE_ADDR: &str =
    "http://chaos-litmus-frontend-service.litmus.svc.cluster.local:9091";

pub const ACTIVATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

const CRD_SETTLE_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("USE_EXISTING_INFRA is set but EXISTING_INFRA_ID is empty")]
    MissingExistingInfraId,

    #[error("USE_EXISTING_ENV is set but EXISTING_ENV_ID is empty")]
    MissingExistingEnvId,

    #[error("INFRA_TOLERATIONS is not a JSON list of tolerations: {0}")]
    InvalidTolerations(#[source] serde_json::Error),

    #[error("infra {0} was registered without an agent manifest")]
    EmptyManifest(String),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("failed to stage agent manifest for infra {infra}: {source}")]
    Stage {
        infra: String,
        source: std::io::Error,
    },

    #[error("infra {infra} did not become active: {source}")]
    Activation { infra: String, source: PollError },
}

/// Infra the run will target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedInfra {
    pub id: String,
    /// Agent manifest, present only for infra registered by this run.
    pub manifest: Option<String>,
    /// True when this run registered the infra and must remove it.
    pub owned: bool,
}

impl ConnectedInfra {
    pub fn existing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            manifest: None,
            owned: false,
        }
    }
}

/// `None` when no existing object was requested, `Some(None)` when one was
/// requested without an ID.
fn existing_id(use_existing: bool, id: Option<&str>) -> Option<Option<String>> {
    use_existing.then(|| id.filter(|id| !id.is_empty()).map(str::to_string))
}

/// Environment ID to register infra under, creating one unless an existing
/// environment was requested.
pub async fn setup_environment(
    client: &ControlPlaneClient,
    settings: &EnvironmentSettings,
) -> Result<String, InfraError> {
    if let Some(existing) = existing_id(settings.use_existing, settings.existing_id.as_deref()) {
        let id = existing.ok_or(InfraError::MissingExistingEnvId)?;
        info!(environment = %id, "Using existing environment");
        return Ok(id);
    }

    let request = CreateEnvironmentRequest {
        environment_id: naming::unique_name(&settings.name),
        name: settings.name.clone(),
        kind: settings.kind,
        description: settings.description.clone(),
        tags: Vec::new(),
    };
    info!(name = %request.name, kind = ?request.kind, "Creating environment");
    let created = run_with_retry("create environment", &RetryPolicy::default(), || {
        client.create_environment(&request)
    })
    .await?;
    info!(environment = %created.environment_id, "Environment created");
    Ok(created.environment_id)
}

/// Tolerations given as a JSON list, e.g.
/// `[{"key":"dedicated","operator":"Equal","value":"chaos","effect":"NoSchedule"}]`.
pub fn parse_tolerations(raw: Option<&str>) -> Result<Vec<Toleration>, InfraError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str(raw).map_err(InfraError::InvalidTolerations),
        None => Ok(Vec::new()),
    }
}

/// Resolve the infra to run against, registering and activating a new one
/// when configured to.
///
/// Returns `None` when infra handling is switched off and no existing infra
/// was named. Infra registered here is deleted again if a later step fails.
pub async fn setup_infrastructure(
    client: &ControlPlaneClient,
    infra: &InfraSettings,
    environment: &EnvironmentSettings,
) -> Result<Option<ConnectedInfra>, InfraError> {
    let existing = existing_id(infra.use_existing_infra, infra.existing_infra_id.as_deref());

    if !infra.install_infra {
        info!("Infra installation disabled");
        return Ok(existing.flatten().map(ConnectedInfra::existing));
    }
    if let Some(existing) = existing {
        let id = existing.ok_or(InfraError::MissingExistingInfraId)?;
        info!(infra = %id, "Using existing infra");
        return Ok(Some(ConnectedInfra::existing(id)));
    }

    let tolerations = parse_tolerations(infra.tolerations.as_deref())?;
    let environment_id = if infra.environment_id.is_empty() {
        setup_environment(client, environment).await?
    } else {
        infra.environment_id.clone()
    };

    let request = RegisterInfraRequest {
        name: infra.name.clone(),
        description: infra.description.clone(),
        environment_id,
        platform_name: infra.platform_name.clone(),
        infra_namespace: infra.namespace.clone(),
        service_account: infra.service_account.clone(),
        infra_scope: infra.scope.clone(),
        infra_ns_exists: infra.ns_exists,
        infra_sa_exists: infra.sa_exists,
        skip_ssl: infra.skip_ssl,
        infrastructure_type: "Kubernetes".to_string(),
        node_selector: infra.node_selector.clone(),
        tolerations,
    };
    info!(name = %request.name, "Registering infra");
    let registered = run_with_retry("register infra", &RetryPolicy::default(), || {
        client.register_infra(&request)
    })
    .await?;
    info!(infra = %registered.infra_id, "Infra registered");

    let connected = ConnectedInfra {
        id: registered.infra_id,
        manifest: Some(registered.manifest).filter(|m| !m.is_empty()),
        owned: true,
    };
    if connected.manifest.is_none() {
        let err = InfraError::EmptyManifest(connected.id.clone());
        return Err(release_on_failure(client, &connected, err).await);
    }
    if !infra.activate_infra {
        info!(infra = %connected.id, "Infra activation disabled");
    } else if let Err(err) = activate_infrastructure(client, &connected, infra).await {
        return Err(release_on_failure(client, &connected, err).await);
    }
    Ok(Some(connected))
}

/// Delete infra registered by a setup that failed afterwards, handing the
/// original error back.
async fn release_on_failure(
    client: &ControlPlaneClient,
    connected: &ConnectedInfra,
    err: InfraError,
) -> InfraError {
    warn!(infra = %connected.id, error = %err, "Infra setup failed, removing registered infra");
    if let Err(cleanup) = disconnect_infrastructure(client, Some(connected)).await {
        warn!(infra = %connected.id, error = %cleanup, "Failed to remove registered infra");
    }
    err
}

/// Point a registration manifest at the in-cluster frontend service.
pub fn rewrite_manifest_endpoint(manifest: &str) -> String {
    if manifest.contains(LOCAL_SERVER_ADDR) {
        manifest.replace(LOCAL_SERVER_ADDR, FRONTEND_SERVICE_ADDR)
    } else {
        manifest.to_string()
    }
}

async fn ensure_namespace(namespace: &str) -> Result<(), ExecError> {
    let found = exec::capture("kubectl", ["get", "namespace", namespace]).await?;
    if found.success() {
        debug!(namespace, "Namespace exists");
        return Ok(());
    }
    info!(namespace, "Creating namespace");
    exec::kubectl(["create", "namespace", namespace]).await?;
    Ok(())
}

/// Install the agent for `connected` and wait for it to report in.
pub async fn activate_infrastructure(
    client: &ControlPlaneClient,
    connected: &ConnectedInfra,
    settings: &InfraSettings,
) -> Result<(), InfraError> {
    let manifest = connected
        .manifest
        .as_deref()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| InfraError::EmptyManifest(connected.id.clone()))?;

    ensure_namespace(&settings.namespace).await?;

    info!(url = PORTAL_CRDS_URL, "Applying portal CRDs");
    exec::kubectl(["apply", "-f", PORTAL_CRDS_URL]).await?;
    tokio::time::sleep(CRD_SETTLE_TIME).await;

    if !manifest.contains(&connected.id) {
        warn!(infra = %connected.id, "Agent manifest does not mention the infra ID");
    }
    let manifest = rewrite_manifest_endpoint(manifest);

    let stage = |source| InfraError::Stage {
        infra: connected.id.clone(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{}-infra-", connected.id))
        .suffix(".yaml")
        .tempfile()
        .map_err(stage)?;
    file.write_all(manifest.as_bytes()).map_err(stage)?;
    file.flush().map_err(stage)?;

    let path = file.path().to_string_lossy().into_owned();
    info!(infra = %connected.id, "Applying agent manifest");
    exec::kubectl(["apply", "-f", path.as_str(), "--validate=false"]).await?;

    let request = PollRequest::new(connected.id.clone(), StateSet::infra_active())
        .with_interval(ACTIVATION_POLL_INTERVAL)
        .with_timeout(settings.activation_timeout);
    let source = InfraActivity::new(client.clone(), connected.id.clone());
    poll_source(&source, &request)
        .await
        .into_outcome()
        .map_err(|source| InfraError::Activation {
            infra: connected.id.clone(),
            source,
        })?;
    info!(infra = %connected.id, "Infra is active");
    Ok(())
}

/// Remove infra this run registered. Existing infra is left alone.
pub async fn disconnect_infrastructure(
    client: &ControlPlaneClient,
    connected: Option<&ConnectedInfra>,
) -> Result<(), InfraError> {
    let Some(connected) = connected else {
        info!("No infra to disconnect");
        return Ok(());
    };
    if !connected.owned {
        info!(infra = %connected.id, "Leaving existing infra connected");
        return Ok(());
    }
    let message = client.delete_infra(&connected.id).await?;
    info!(infra = %connected.id, %message, "Infra disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::types::EnvironmentType;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn environment() -> EnvironmentSettings {
        EnvironmentSettings {
            use_existing: false,
            existing_id: None,
            name: "chaos-ci-env".to_string(),
            kind: EnvironmentType::NonProd,
            description: "CI Test Environment".to_string(),
        }
    }

    fn infra() -> InfraSettings {
        InfraSettings {
            name: "ci-infra-pod-delete".to_string(),
            namespace: "litmus".to_string(),
            scope: "namespace".to_string(),
            service_account: "litmus".to_string(),
            description: "CI Test Infrastructure".to_string(),
            platform_name: "others".to_string(),
            environment_id: String::new(),
            ns_exists: false,
            sa_exists: false,
            skip_ssl: false,
            node_selector: None,
            tolerations: None,
            install_infra: true,
            use_existing_infra: false,
            existing_infra_id: None,
            activate_infra: false,
            activation_timeout: Duration::from_secs(300),
        }
    }

    fn client(server: &MockServer) -> ControlPlaneClient {
        ControlPlaneClient::with_token(&server.uri(), "token", "project-1").unwrap()
    }

    #[test]
    fn test_rewrite_manifest_endpoint() {
        let manifest = "SERVER_ADDR: http://localhost:9091/api/query\nother: http://localhost:9091";
        let rewritten = rewrite_manifest_endpoint(manifest);
        assert!(!rewritten.contains("localhost"));
        assert_eq!(rewritten.matches(FRONTEND_SERVICE_ADDR).count(), 2);

        let untouched = "SERVER_ADDR: https://chaos.example.com/api/query";
        assert_eq!(rewrite_manifest_endpoint(untouched), untouched);
    }

    #[tokio::test]
    async fn test_existing_environment_requires_id() {
        let server = MockServer::start().await;
        let mut settings = environment();
        settings.use_existing = true;

        let err = setup_environment(&client(&server), &settings).await.unwrap_err();
        assert!(matches!(err, InfraError::MissingExistingEnvId));

        settings.existing_id = Some("env-7".to_string());
        let id = setup_environment(&client(&server), &settings).await.unwrap();
        assert_eq!(id, "env-7");
    }

    #[tokio::test]
    async fn test_existing_infra_is_not_owned() {
        let server = MockServer::start().await;
        let mut settings = infra();
        settings.use_existing_infra = true;

        let err = setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::MissingExistingInfraId));

        settings.existing_infra_id = Some("infra-3".to_string());
        let connected = setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap();
        assert_eq!(connected, Some(ConnectedInfra::existing("infra-3")));
    }

    #[tokio::test]
    async fn test_install_disabled_keeps_named_existing_infra() {
        let server = MockServer::start().await;
        let mut settings = infra();
        settings.install_infra = false;
        assert_eq!(
            setup_infrastructure(&client(&server), &settings, &environment())
                .await
                .unwrap(),
            None
        );

        settings.use_existing_infra = true;
        settings.existing_infra_id = Some("infra-3".to_string());
        let connected = setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap();
        assert_eq!(connected.map(|c| c.id).as_deref(), Some("infra-3"));
    }

    #[tokio::test]
    async fn test_registers_under_new_environment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_partial_json(json!({"operationName": "createEnvironment"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"createEnvironment": {"environmentID": "env-1", "name": "chaos-ci-env"}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_partial_json(json!({
                "operationName": "registerInfra",
                "variables": {"request": {"environmentID": "env-1"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"registerInfra": {"infraID": "infra-9", "manifest": "kind: List"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connected = setup_infrastructure(&client(&server), &infra(), &environment())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connected.id, "infra-9");
        assert!(connected.owned);
        assert_eq!(connected.manifest.as_deref(), Some("kind: List"));
    }

    async fn mount_register(server: &MockServer, manifest: &str) {
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_partial_json(json!({"operationName": "registerInfra"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"registerInfra": {"infraID": "infra-9", "manifest": manifest}}
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn expect_delete(server: &MockServer, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_partial_json(json!({
                "operationName": "deleteInfra",
                "variables": {"infraID": "infra-9"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"deleteInfra": "infra deleted"}
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_empty_manifest_is_rejected_and_infra_removed() {
        let server = MockServer::start().await;
        mount_register(&server, "").await;
        expect_delete(&server, 1).await;
        let mut settings = infra();
        settings.environment_id = "env-1".to_string();

        let err = setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::EmptyManifest(id) if id == "infra-9"));
    }

    #[tokio::test]
    async fn test_failed_activation_removes_registered_infra() {
        let server = MockServer::start().await;
        mount_register(&server, "kind: List\nmetadata: {name: infra-9}").await;
        expect_delete(&server, 1).await;
        let mut settings = infra();
        settings.environment_id = "env-1".to_string();
        settings.namespace = "chaos-ci-unreachable-ns".to_string();
        settings.activate_infra = true;
        settings.activation_timeout = Duration::from_millis(1);

        let result = setup_infrastructure(&client(&server), &settings, &environment()).await;
        assert!(result.is_err(), "activation without a cluster should fail");
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_infra() {
        let server = MockServer::start().await;
        mount_register(&server, "kind: List").await;
        expect_delete(&server, 0).await;
        let mut settings = infra();
        settings.environment_id = "env-1".to_string();

        let connected = setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap();
        assert!(connected.is_some_and(|c| c.owned));
    }

    #[tokio::test]
    async fn test_tolerations_are_sent_with_registration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_partial_json(json!({
                "operationName": "registerInfra",
                "variables": {"request": {"tolerations": [
                    {"key": "dedicated", "operator": "Equal", "value": "chaos", "effect": "NoSchedule"}
                ]}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"registerInfra": {"infraID": "infra-9", "manifest": "kind: List"}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let mut settings = infra();
        settings.environment_id = "env-1".to_string();
        settings.tolerations = Some(
            r#"[{"key":"dedicated","operator":"Equal","value":"chaos","effect":"NoSchedule"}]"#
                .to_string(),
        );

        setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_tolerations_fail_before_registering() {
        let server = MockServer::start().await;
        let mut settings = infra();
        settings.environment_id = "env-1".to_string();
        settings.tolerations = Some("dedicated=chaos:NoSchedule".to_string());

        let err = setup_infrastructure(&client(&server), &settings, &environment())
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::InvalidTolerations(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_parse_tolerations() {
        assert!(parse_tolerations(None).unwrap().is_empty());
        assert!(parse_tolerations(Some("  ")).unwrap().is_empty());

        let parsed = parse_tolerations(Some(
            r#"[{"operator":"Exists","effect":"NoExecute","tolerationSeconds":60}]"#,
        ))
        .unwrap();
        assert_eq!(
            parsed,
            [Toleration {
                operator: Some("Exists".to_string()),
                effect: Some("NoExecute".to_string()),
                toleration_seconds: Some(60),
                ..Default::default()
            }]
        );
    }

    #[tokio::test]
    async fn test_disconnect_only_owned_infra() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(body_partial_json(json!({"operationName": "deleteInfra"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"deleteInfra": "infra deleted"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = client(&server);

        disconnect_infrastructure(&client, None).await.unwrap();
        disconnect_infrastructure(&client, Some(&ConnectedInfra::existing("infra-3")))
            .await
            .unwrap();
        let owned = ConnectedInfra {
            id: "infra-9".to_string(),
            manifest: None,
            owned: true,
        };
        disconnect_infrastructure(&client, Some(&owned)).await.unwrap();
    }
}
