//! Kubernetes client construction.

use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KubeClientError {
    #[error("failed to load kubeconfig {path}: {source}")]
    Kubeconfig {
        path: PathBuf,
        source: KubeconfigError,
    },

    #[error("failed to infer cluster configuration: {0}")]
    Infer(#[source] kube::Error),

    #[error("failed to build Kubernetes client: {0}")]
    Build(#[source] kube::Error),
}

/// Expand `~` and environment references in a kubeconfig path.
pub fn expand_kubeconfig_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

/// Client for the cluster named by `kubeconfig`, or inferred from the
/// environment (`KUBECONFIG`, `~/.kube/config`, in-cluster) when `None`.
pub async fn connect(kubeconfig: Option<&str>) -> Result<Client, KubeClientError> {
    let Some(raw) = kubeconfig.filter(|p| !p.is_empty()) else {
        debug!("Inferring Kubernetes configuration");
        return Client::try_default().await.map_err(KubeClientError::Infer);
    };

    let path = expand_kubeconfig_path(raw);
    debug!(path = %path.display(), "Loading kubeconfig");
    let kubeconfig = Kubeconfig::read_from(&path).map_err(|source| KubeClientError::Kubeconfig {
        path: path.clone(),
        source,
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|source| KubeClientError::Kubeconfig { path, source })?;
    Client::try_from(config).map_err(KubeClientError::Build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_kubeconfig_path_tilde() {
        let expanded = expand_kubeconfig_path("~/.kube/config");
        assert!(expanded.ends_with(".kube/config"));
        assert_eq!(expand_kubeconfig_path("/etc/kube.yaml"), PathBuf::from("/etc/kube.yaml"));
    }

    #[tokio::test]
    async fn test_unreadable_kubeconfig_is_reported_with_path() {
        let Err(err) = connect(Some("/nonexistent/chaos-ci/kubeconfig")).await else {
            panic!("missing kubeconfig was accepted");
        };
        match err {
            KubeClientError::Kubeconfig { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/chaos-ci/kubeconfig"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_kubeconfig_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this: [is not a kubeconfig").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        assert!(matches!(
            connect(Some(path.as_str())).await,
            Err(KubeClientError::Kubeconfig { .. })
        ));
    }
}
