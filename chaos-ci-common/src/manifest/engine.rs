//! Typed ChaosEngine construction.

use std::collections::BTreeMap;

use super::ManifestError;
use super::fault::FaultKind;
use crate::config::ExperimentDetails;
use crate::crd::{
    ApplicationParams, ChaosEngine, ChaosEngineSpec, EngineComponents, EngineState, EnvPair,
    ExperimentAttributes, ExperimentComponents, ExperimentList, ProbeRef, RunnerInfo,
};

/// Annotation Litmus 3 reads probe references from.
pub const PROBE_REF_ANNOTATION: &str = "probeRef";

/// Builds a [`ChaosEngine`] for one fault.
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    fault: FaultKind,
    name: Option<String>,
    generate_name: Option<String>,
    namespace: Option<String>,
    app: ApplicationParams,
    service_account: String,
    cleanup_policy: String,
    annotation_check: bool,
    runner: Option<RunnerInfo>,
    experiment_image: String,
    env: Vec<EnvPair>,
    labels: BTreeMap<String, String>,
    probes: Vec<ProbeRef>,
}

impl EngineBuilder {
    pub fn new(fault: FaultKind) -> Self {
        Self {
            fault,
            name: None,
            generate_name: None,
            namespace: None,
            app: ApplicationParams::default(),
            service_account: format!("{}-sa", fault.name()),
            cleanup_policy: "retain".to_string(),
            annotation_check: false,
            runner: None,
            experiment_image: String::new(),
            env: Vec::new(),
            labels: BTreeMap::new(),
            probes: Vec::new(),
        }
    }

    /// Everything the native path needs, taken from the run configuration.
    pub fn from_details(fault: FaultKind, details: &ExperimentDetails) -> Self {
        let target = &details.target;
        Self::new(fault)
            .name(&details.engine_name)
            .namespace(&target.chaos_namespace)
            .app(&target.app_ns, &target.app_label, &target.app_kind)
            .service_account(&target.chaos_service_account)
            .cleanup_policy(&target.job_cleanup_policy)
            .annotation_check(target.annotation_check)
            .runner_image(&details.images.runner_image, &details.images.image_pull_policy)
            .experiment_image(&details.images.experiment_image)
            .env(fault.experiment_env(&details.tunables, &target.application_node_name))
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Let the API server pick the name from `prefix`.
    pub fn generate_name(mut self, prefix: &str) -> Self {
        self.generate_name = Some(prefix.to_string());
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn app(mut self, ns: &str, label: &str, kind: &str) -> Self {
        self.app = ApplicationParams {
            appns: ns.to_string(),
            applabel: label.to_string(),
            appkind: kind.to_string(),
        };
        self
    }

    pub fn service_account(mut self, account: &str) -> Self {
        self.service_account = account.to_string();
        self
    }

    pub fn cleanup_policy(mut self, policy: &str) -> Self {
        self.cleanup_policy = policy.to_string();
        self
    }

    pub fn annotation_check(mut self, enabled: bool) -> Self {
        self.annotation_check = enabled;
        self
    }

    pub fn runner_image(mut self, image: &str, pull_policy: &str) -> Self {
        self.runner = Some(RunnerInfo {
            image: image.to_string(),
            image_pull_policy: pull_policy.to_string(),
        });
        self
    }

    pub fn experiment_image(mut self, image: &str) -> Self {
        self.experiment_image = image.to_string();
        self
    }

    pub fn env(mut self, env: Vec<EnvPair>) -> Self {
        self.env = env;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn probe(mut self, name: &str, mode: &str) -> Self {
        self.probes.push(ProbeRef {
            name: name.to_string(),
            mode: mode.to_string(),
        });
        self
    }

    pub fn build(self) -> Result<ChaosEngine, ManifestError> {
        if self.name.is_none() && self.generate_name.is_none() {
            return Err(ManifestError::MissingField("metadata.name or metadata.generateName"));
        }
        if self.app.appns.is_empty() || self.app.applabel.is_empty() {
            return Err(ManifestError::MissingField("spec.appinfo"));
        }

        let spec = ChaosEngineSpec {
            appinfo: self.app,
            annotation_check: self.annotation_check.to_string(),
            engine_state: EngineState::Active,
            chaos_service_account: self.service_account,
            job_cleanup_policy: self.cleanup_policy,
            components: self.runner.map(|runner| EngineComponents { runner }),
            experiments: vec![ExperimentList {
                name: self.fault.name().to_string(),
                spec: ExperimentAttributes {
                    components: ExperimentComponents {
                        env: self.env,
                        experiment_image: self.experiment_image,
                    },
                    probe: Vec::new(),
                },
            }],
        };

        let mut engine = ChaosEngine::new(self.name.as_deref().unwrap_or_default(), spec);
        engine.metadata.name = self.name;
        engine.metadata.generate_name = self.generate_name;
        engine.metadata.namespace = self.namespace;
        if !self.labels.is_empty() {
            engine.metadata.labels = Some(self.labels);
        }
        if !self.probes.is_empty() {
            let refs = serde_json::to_string(&self.probes)
                .map_err(|e| ManifestError::Serialize(e.to_string()))?;
            engine.metadata.annotations =
                Some(BTreeMap::from([(PROBE_REF_ANNOTATION.to_string(), refs)]));
        }
        Ok(engine)
    }
}

/// Engine as YAML, the form embedded in workflow artifacts.
pub fn engine_yaml(engine: &ChaosEngine) -> Result<String, ManifestError> {
    serde_yaml_ng::to_string(engine).map_err(|e| ManifestError::Serialize(e.to_string()))
}
