//! Argo workflow documents submitted through the control plane.
//!
//! A workflow has three steps: install the fault definition, run the engine
//! through `litmus-checker` (which waits for the engine and records its
//! verdict), then delete the engines the run created.

use serde::Serialize;

use super::ManifestError;
use super::engine::{EngineBuilder, engine_yaml};
use super::fault::FaultKind;
use crate::control_plane::types::SaveExperimentRequest;

const ADMIN_NAMESPACE: &str = "litmus-2";
const WORKFLOW_SERVICE_ACCOUNT: &str = "argo-chaos";
const ENGINE_SERVICE_ACCOUNT: &str = "litmus-admin";
const KUBECTL_IMAGE: &str = "litmuschaos/k8s:2.11.0";
const CHECKER_IMAGE: &str = "docker.io/litmuschaos/litmus-checker:2.11.0";
const FAULT_HUB_VERSION: &str = "3.16.0";
const ADMIN_NAMESPACE_PARAM: &str = "{{workflow.parameters.adminModeNamespace}}";
const WORKFLOW_UID: &str = "{{workflow.uid}}";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub api_version: String,
    pub kind: String,
    pub metadata: WorkflowMetadata,
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub entrypoint: String,
    pub service_account_name: String,
    #[serde(rename = "podGC")]
    pub pod_gc: PodGc,
    pub security_context: SecurityContext,
    pub arguments: Arguments,
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PodGc {
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub run_as_user: u32,
    pub run_as_non_root: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Arguments {
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Template {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Vec<Step>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Inputs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Step {
    pub name: String,
    pub template: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Inputs {
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub path: String,
    pub raw: RawArtifact,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RawArtifact {
    pub data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    pub args: Vec<String>,
}

/// URL of the published fault definition for `fault`.
pub fn fault_definition_url(fault: FaultKind) -> String {
    format!(
        "https://hub.litmuschaos.io/api/chaos/{FAULT_HUB_VERSION}?file=faults/kubernetes/{}/fault.yaml",
        fault.name()
    )
}

fn step(name: &str) -> Vec<Step> {
    vec![Step {
        name: name.to_string(),
        template: name.to_string(),
    }]
}

fn shell(image: &str, script: String) -> Container {
    Container {
        name: String::new(),
        image: image.to_string(),
        command: vec!["sh".to_string(), "-c".to_string()],
        args: vec![script],
    }
}

/// Builds the workflow for one fault run.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    fault: FaultKind,
    name: String,
    app_ns: String,
    app_label: String,
    app_kind: String,
    chaos_duration_secs: u64,
    chaos_interval_secs: u64,
    probe: Option<(String, String)>,
}

impl WorkflowBuilder {
    pub fn new(fault: FaultKind, name: &str) -> Self {
        Self {
            fault,
            name: name.to_string(),
            app_ns: ADMIN_NAMESPACE.to_string(),
            app_label: "app=nginx".to_string(),
            app_kind: "deployment".to_string(),
            chaos_duration_secs: 15,
            chaos_interval_secs: 5,
            probe: None,
        }
    }

    pub fn app(mut self, ns: &str, label: &str, kind: &str) -> Self {
        self.app_ns = ns.to_string();
        self.app_label = label.to_string();
        self.app_kind = kind.to_string();
        self
    }

    pub fn timing(mut self, duration_secs: u64, interval_secs: u64) -> Self {
        self.chaos_duration_secs = duration_secs;
        self.chaos_interval_secs = interval_secs;
        self
    }

    pub fn probe(mut self, name: &str, mode: &str) -> Self {
        self.probe = Some((name.to_string(), mode.to_string()));
        self
    }

    fn engine_step_name(&self) -> String {
        format!("{}-ce5", self.fault.name())
    }

    fn engine_artifact(&self) -> Result<String, ManifestError> {
        let tunables = crate::config::FaultTunables {
            chaos_duration_secs: self.chaos_duration_secs,
            chaos_interval_secs: self.chaos_interval_secs,
            ..Default::default()
        };
        let mut engine = EngineBuilder::new(self.fault)
            .generate_name(&self.engine_step_name())
            .namespace(ADMIN_NAMESPACE_PARAM)
            .app(&self.app_ns, &self.app_label, &self.app_kind)
            .service_account(ENGINE_SERVICE_ACCOUNT)
            .label("workflow_run_id", WORKFLOW_UID)
            .label("workflow_name", &self.name)
            .env(self.fault.experiment_env(&tunables, ""));
        if let Some((name, mode)) = &self.probe {
            engine = engine.probe(name, mode);
        }
        engine_yaml(&engine.build()?)
    }

    pub fn build(&self) -> Result<Workflow, ManifestError> {
        let entrypoint = format!("{}-engine", self.fault.name());
        let engine_step = self.engine_step_name();

        let install = Template {
            name: "install-chaos-faults".to_string(),
            steps: Vec::new(),
            inputs: None,
            container: Some(shell(
                KUBECTL_IMAGE,
                format!(
                    "kubectl apply -f '{}' -n {ADMIN_NAMESPACE_PARAM} && sleep 30",
                    fault_definition_url(self.fault)
                ),
            )),
        };

        let run = Template {
            name: engine_step.clone(),
            steps: Vec::new(),
            inputs: Some(Inputs {
                artifacts: vec![Artifact {
                    name: engine_step.clone(),
                    path: format!("/tmp/{engine_step}.yaml"),
                    raw: RawArtifact {
                        data: self.engine_artifact()?,
                    },
                }],
            }),
            container: Some(Container {
                name: String::new(),
                image: CHECKER_IMAGE.to_string(),
                command: Vec::new(),
                args: vec![
                    format!("-file=/tmp/{engine_step}.yaml"),
                    "-saveName=/tmp/engine-name".to_string(),
                ],
            }),
        };

        let cleanup = Template {
            name: "cleanup-chaos-resources".to_string(),
            steps: Vec::new(),
            inputs: None,
            container: Some(shell(
                KUBECTL_IMAGE,
                format!(
                    "kubectl delete chaosengine -l workflow_run_id={WORKFLOW_UID} -n {ADMIN_NAMESPACE_PARAM}"
                ),
            )),
        };

        let entry = Template {
            name: entrypoint.clone(),
            steps: vec![
                step("install-chaos-faults"),
                step(&engine_step),
                step("cleanup-chaos-resources"),
            ],
            inputs: None,
            container: None,
        };

        Ok(Workflow {
            api_version: "argoproj.io/v1alpha1".to_string(),
            kind: "Workflow".to_string(),
            metadata: WorkflowMetadata {
                name: self.name.clone(),
                namespace: ADMIN_NAMESPACE.to_string(),
            },
            spec: WorkflowSpec {
                entrypoint,
                service_account_name: WORKFLOW_SERVICE_ACCOUNT.to_string(),
                pod_gc: PodGc {
                    strategy: "OnWorkflowCompletion".to_string(),
                },
                security_context: SecurityContext {
                    run_as_user: 1000,
                    run_as_non_root: true,
                },
                arguments: Arguments {
                    parameters: vec![Parameter {
                        name: "adminModeNamespace".to_string(),
                        value: ADMIN_NAMESPACE.to_string(),
                    }],
                },
                templates: vec![entry, install, run, cleanup],
            },
        })
    }

    /// Request that saves this workflow as experiment `experiment_id` on
    /// `infra_id`.
    pub fn save_request(
        &self,
        experiment_id: &str,
        infra_id: &str,
    ) -> Result<SaveExperimentRequest, ManifestError> {
        let manifest = serde_json::to_string(&self.build()?)
            .map_err(|e| ManifestError::Serialize(e.to_string()))?;
        let fault = self.fault.name();
        Ok(SaveExperimentRequest {
            id: experiment_id.to_string(),
            name: self.name.clone(),
            infra_id: infra_id.to_string(),
            description: format!("{fault} chaos experiment execution"),
            tags: vec![fault.to_string(), "chaos".to_string(), "litmus".to_string()],
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_workflow_has_three_ordered_steps() {
        let workflow = WorkflowBuilder::new(FaultKind::PodDelete, "pod-delete-1a2b3c4d")
            .build()
            .unwrap();
        let entry = &workflow.spec.templates[0];
        assert_eq!(entry.name, workflow.spec.entrypoint);
        let order: Vec<_> = entry.steps.iter().map(|s| s[0].name.as_str()).collect();
        assert_eq!(
            order,
            ["install-chaos-faults", "pod-delete-ce5", "cleanup-chaos-resources"]
        );
        assert_eq!(workflow.spec.templates.len(), 4);
    }

    #[test]
    fn test_engine_artifact_is_embedded_yaml() {
        let workflow = WorkflowBuilder::new(FaultKind::PodNetworkLoss, "net-loss")
            .app("shop", "app=cart", "deployment")
            .timing(30, 10)
            .probe("http-probe", "SOT")
            .build()
            .unwrap();

        let run = &workflow.spec.templates[2];
        let data = &run.inputs.as_ref().unwrap().artifacts[0].raw.data;
        let engine: serde_yaml_ng::Value = serde_yaml_ng::from_str(data).unwrap();
        assert_eq!(engine["kind"].as_str(), Some("ChaosEngine"));
        assert_eq!(
            engine["metadata"]["labels"]["workflow_run_id"].as_str(),
            Some("{{workflow.uid}}")
        );
        assert_eq!(engine["spec"]["appinfo"]["appns"].as_str(), Some("shop"));
        assert_eq!(engine["spec"]["chaosServiceAccount"].as_str(), Some("litmus-admin"));
        assert!(engine["metadata"]["annotations"]["probeRef"].is_string());

        let env = engine["spec"]["experiments"][0]["spec"]["components"]["env"]
            .as_sequence()
            .unwrap();
        assert!(env.iter().any(|e| e["name"].as_str() == Some("TOTAL_CHAOS_DURATION")
            && e["value"].as_str() == Some("30")));
    }

    #[test]
    fn test_save_request_serializes_manifest_as_json() {
        let request = WorkflowBuilder::new(FaultKind::PodDelete, "pod-delete-x")
            .save_request("exp-1", "infra-9")
            .unwrap();
        assert_eq!(request.infra_id, "infra-9");
        assert_eq!(request.tags, ["pod-delete", "chaos", "litmus"]);

        let manifest: Value = serde_json::from_str(&request.manifest).unwrap();
        assert_eq!(manifest["kind"], "Workflow");
        assert_eq!(manifest["spec"]["serviceAccountName"], "argo-chaos");
        assert_eq!(manifest["spec"]["podGC"]["strategy"], "OnWorkflowCompletion");
        assert!(manifest["spec"]["templates"][0].get("container").is_none());
    }

    #[test]
    fn test_fault_definition_url() {
        assert!(fault_definition_url(FaultKind::DiskFill).contains("faults/kubernetes/disk-fill/fault.yaml"));
    }
}
