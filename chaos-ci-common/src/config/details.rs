//! Per-experiment configuration read from the CI job environment.

use std::time::Duration;

use super::env::{EnvError, EnvParser};
use super::source::{ConfigEntry, Sourced};
use crate::control_plane::types::{
    EnvironmentType, HttpGetCriteria, HttpProbeMethod, HttpProbeProperties, ProbeRequest,
};
use crate::poll::{PollRequest, StateSet};

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Where the chaos is aimed and how the engine is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSettings {
    pub operator_name: String,
    pub chaos_namespace: String,
    pub app_ns: String,
    pub app_label: String,
    pub app_kind: String,
    pub annotation_check: bool,
    pub job_cleanup_policy: String,
    pub chaos_service_account: String,
    pub application_node_name: String,
}

/// Values passed to the experiment pod as environment entries.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultTunables {
    pub chaos_duration_secs: u64,
    pub chaos_interval_secs: u64,
    pub target_container: String,
    pub target_pods: String,
    pub pods_affected_perc: u32,
    pub nodes_affected_perc: u32,
    pub cpu_cores: u32,
    pub node_cpu_core: u32,
    pub force: bool,
    pub fill_percentage: u32,
    pub cpu_kill_command: String,
    pub memory_consumption: u32,
    pub memory_percentage: u32,
    pub memory_consumption_percentage: u32,
    pub container_runtime: String,
    pub container_path: String,
    pub socket_path: String,
    pub network_interface: String,
    pub network_latency_ms: u64,
    pub packet_duplication_percentage: u32,
    pub packet_corruption_percentage: u32,
    pub packet_loss_percentage: u32,
    pub filesystem_utilization_percentage: u32,
    pub filesystem_utilization_bytes: Option<u64>,
    pub replica_count: u32,
}

impl Default for FaultTunables {
    fn default() -> Self {
        Self {
            chaos_duration_secs: 60,
            chaos_interval_secs: 30,
            target_container: String::new(),
            target_pods: String::new(),
            pods_affected_perc: 0,
            nodes_affected_perc: 0,
            cpu_cores: 1,
            node_cpu_core: 2,
            force: false,
            fill_percentage: 20,
            cpu_kill_command: "md5sum /dev/zero".to_string(),
            memory_consumption: 500,
            memory_percentage: 80,
            memory_consumption_percentage: 30,
            container_runtime: "containerd".to_string(),
            container_path: "/var/lib/containerd/io.containerd.grpc.v1.cri/containers/".to_string(),
            socket_path: "/run/containerd/containerd.sock".to_string(),
            network_interface: "eth0".to_string(),
            network_latency_ms: 2000,
            packet_duplication_percentage: 100,
            packet_corruption_percentage: 100,
            packet_loss_percentage: 100,
            filesystem_utilization_percentage: 10,
            filesystem_utilization_bytes: None,
            replica_count: 0,
        }
    }
}

/// Timing of every wait in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Budget for remote experiment runs (`EXPERIMENT_TIMEOUT`, minutes).
    pub experiment_timeout: Duration,
    /// Gap between remote status reads (`EXPERIMENT_POLLING_INTERVAL`, seconds).
    pub polling_interval: Duration,
    /// Budget for native ChaosEngine/ChaosResult waits (`DURATION`, seconds).
    pub native_timeout: Duration,
    /// Gap between native status reads (`DELAY`, seconds).
    pub native_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            experiment_timeout: MINUTE * 8,
            polling_interval: SECOND * 15,
            native_timeout: SECOND * 90,
            native_interval: SECOND * 5,
        }
    }
}

impl PollSettings {
    /// Request for a control-plane wait.
    pub fn request_for(&self, resource: impl Into<String>, states: StateSet) -> PollRequest {
        PollRequest::new(resource, states)
            .with_interval(self.polling_interval)
            .with_timeout(self.experiment_timeout)
    }

    /// Request for a wait on a custom resource in the cluster.
    pub fn native_request_for(&self, resource: impl Into<String>, states: StateSet) -> PollRequest {
        PollRequest::new(resource, states)
            .with_interval(self.native_interval)
            .with_timeout(self.native_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub experiment_image: String,
    pub operator_image: String,
    pub runner_image: String,
    pub image_pull_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLinks {
    pub rbac_path: String,
    pub engine_path: String,
    pub install_litmus_url: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ControlPlaneSettings {
    pub install_chaos_center: bool,
    pub connect_infra: bool,
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub project_id: String,
}

impl std::fmt::Debug for ControlPlaneSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneSettings")
            .field("install_chaos_center", &self.install_chaos_center)
            .field("connect_infra", &self.connect_infra)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("project_id", &self.project_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraSettings {
    pub name: String,
    pub namespace: String,
    pub scope: String,
    pub service_account: String,
    pub description: String,
    pub platform_name: String,
    pub environment_id: String,
    pub ns_exists: bool,
    pub sa_exists: bool,
    pub skip_ssl: bool,
    pub node_selector: Option<String>,
    pub tolerations: Option<String>,
    pub install_infra: bool,
    pub use_existing_infra: bool,
    pub existing_infra_id: Option<String>,
    pub activate_infra: bool,
    pub activation_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub use_existing: bool,
    pub existing_id: Option<String>,
    pub name: String,
    pub kind: EnvironmentType,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub create: bool,
    pub kind: String,
    pub name: String,
    pub mode: String,
    pub url: String,
    pub timeout: String,
    pub interval: String,
    pub attempts: u32,
    pub response_code: String,
}

impl ProbeSettings {
    /// HTTP GET probe that expects `response_code` from `url`.
    pub fn to_request(&self) -> ProbeRequest {
        ProbeRequest {
            name: self.name.clone(),
            description: format!("HTTP probe for {}", self.url),
            kind: self.kind.clone(),
            infrastructure_type: "Kubernetes".to_string(),
            tags: vec!["chaos-ci".to_string()],
            http_properties: HttpProbeProperties {
                probe_timeout: self.timeout.clone(),
                interval: self.interval.clone(),
                attempt: self.attempts,
                url: self.url.clone(),
                method: HttpProbeMethod {
                    get: HttpGetCriteria {
                        criteria: "==".to_string(),
                        response_code: self.response_code.clone(),
                    },
                },
            },
        }
    }
}

/// Everything one experiment run needs from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentDetails {
    pub experiment_name: String,
    pub engine_name: String,
    pub target: TargetSettings,
    pub tunables: FaultTunables,
    pub poll: PollSettings,
    pub images: ImageSettings,
    pub hub: HubLinks,
    pub control_plane: ControlPlaneSettings,
    pub infra: InfraSettings,
    pub environment: EnvironmentSettings,
    pub probe: ProbeSettings,
}

/// Result of reading [`ExperimentDetails`]: the values, a report of where
/// each one came from, and every problem found on the way.
#[derive(Debug, Clone)]
pub struct LoadedDetails {
    pub details: ExperimentDetails,
    pub entries: Vec<ConfigEntry>,
    pub errors: Vec<EnvError>,
}

/// Records every value it reads for the configuration report.
struct Reader {
    parser: EnvParser,
    entries: Vec<ConfigEntry>,
}

impl Reader {
    fn record<T: std::fmt::Display>(&mut self, name: &str, sourced: &Sourced<T>) {
        self.entries.push(ConfigEntry::new(name, sourced));
    }

    fn string(&mut self, name: &str, default: &str) -> String {
        let v = self.parser.get_string(name, default);
        self.record(name, &v);
        v.value
    }

    fn secret(&mut self, name: &str) -> String {
        let v = self.parser.get_string(name, "");
        self.entries.push(ConfigEntry::masked(name, &v));
        v.value
    }

    fn optional(&mut self, name: &str) -> Option<String> {
        let v = self.parser.get_optional_string(name);
        let shown = v.clone().map(|o| o.unwrap_or_default());
        self.record(name, &shown);
        v.value
    }

    fn flag(&mut self, name: &str, default: bool) -> bool {
        let v = self.parser.get_bool(name, default);
        self.record(name, &v);
        v.value
    }

    fn number(&mut self, name: &str, default: u32, max: u32) -> u32 {
        let v = self.parser.get_u32_range(name, default, 0, max);
        self.record(name, &v);
        v.value
    }

    fn wide(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let v = self.parser.get_u64_range(name, default, min, max);
        self.record(name, &v);
        v.value
    }

    fn duration(&mut self, name: &str, default: Duration, unit: Duration) -> Duration {
        let v = self.parser.get_duration(name, default, unit);
        let shown = v.clone().map(|d| humantime::format_duration(d).to_string());
        self.record(name, &shown);
        v.value
    }
}

impl ExperimentDetails {
    /// Read the configuration for `experiment` run by `engine`.
    pub fn from_env(experiment: &str, engine: &str) -> LoadedDetails {
        let mut r = Reader {
            parser: EnvParser::new(),
            entries: Vec::new(),
        };

        let target = TargetSettings {
            operator_name: r.string("OPERATOR_NAME", "chaos-operator-ce"),
            chaos_namespace: r.string("CHAOS_NAMESPACE", "default"),
            app_ns: r.string("APP_NS", "litmus"),
            app_label: r.string("APP_LABEL", "app=nginx"),
            app_kind: r.string("APP_KIND", "deployment"),
            annotation_check: r.flag("ANNOTATION_CHECK", false),
            job_cleanup_policy: r.string("JOB_CLEANUP_POLICY", "retain"),
            chaos_service_account: r.string("CHAOS_SERVICE_ACCOUNT", &format!("{experiment}-sa")),
            application_node_name: r.string("APPLICATION_NODE_NAME", ""),
        };

        let defaults = FaultTunables::default();
        let tunables = FaultTunables {
            chaos_duration_secs: r.wide("TOTAL_CHAOS_DURATION", defaults.chaos_duration_secs, 1, 86_400),
            chaos_interval_secs: r.wide("CHAOS_INTERVAL", defaults.chaos_interval_secs, 1, 86_400),
            target_container: r.string("TARGET_CONTAINER", ""),
            target_pods: r.string("TARGET_PODS", ""),
            pods_affected_perc: r.number("PODS_AFFECTED_PERC", defaults.pods_affected_perc, 100),
            nodes_affected_perc: r.number("NODES_AFFECTED_PERC", defaults.nodes_affected_perc, 100),
            cpu_cores: r.number("CPU_CORES", defaults.cpu_cores, 1024),
            node_cpu_core: r.number("NODE_CPU_CORE", defaults.node_cpu_core, 1024),
            force: r.flag("FORCE", defaults.force),
            fill_percentage: r.number("FILL_PERCENTAGE", defaults.fill_percentage, 100),
            cpu_kill_command: r.string("CPU_KILL_COMMAND", &defaults.cpu_kill_command),
            memory_consumption: r.number("MEMORY_CONSUMPTION", defaults.memory_consumption, u32::MAX),
            memory_percentage: r.number("MEMORY_PERCENTAGE", defaults.memory_percentage, 100),
            memory_consumption_percentage: r.number(
                "MEMORY_CONSUMPTION_PERCENTAGE",
                defaults.memory_consumption_percentage,
                100,
            ),
            container_runtime: r.string("CONTAINER_RUNTIME", &defaults.container_runtime),
            container_path: r.string("CONTAINER_PATH", &defaults.container_path),
            socket_path: r.string("SOCKET_PATH", &defaults.socket_path),
            network_interface: r.string("NETWORK_INTERFACE", &defaults.network_interface),
            network_latency_ms: r.wide("NETWORK_LATENCY", defaults.network_latency_ms, 0, 3_600_000),
            packet_duplication_percentage: r.number(
                "NETWORK_PACKET_DUPLICATION_PERCENTAGE",
                defaults.packet_duplication_percentage,
                100,
            ),
            packet_corruption_percentage: r.number(
                "NETWORK_PACKET_CORRUPTION_PERCENTAGE",
                defaults.packet_corruption_percentage,
                100,
            ),
            packet_loss_percentage: r.number(
                "NETWORK_PACKET_LOSS_PERCENTAGE",
                defaults.packet_loss_percentage,
                100,
            ),
            filesystem_utilization_percentage: r.number(
                "FILESYSTEM_UTILIZATION_PERCENTAGE",
                defaults.filesystem_utilization_percentage,
                100,
            ),
            filesystem_utilization_bytes: r
                .optional("FILESYSTEM_UTILIZATION_BYTES")
                .and_then(|v| v.parse().ok()),
            replica_count: r.number("REPLICA_COUNT", defaults.replica_count, 10_000),
        };

        let poll = PollSettings {
            experiment_timeout: MINUTE * r.wide("EXPERIMENT_TIMEOUT", 8, 1, 1440) as u32,
            polling_interval: SECOND * r.wide("EXPERIMENT_POLLING_INTERVAL", 15, 1, 3600) as u32,
            native_timeout: SECOND * r.wide("DURATION", 90, 1, 86_400) as u32,
            native_interval: SECOND * r.wide("DELAY", 5, 1, 3600) as u32,
        };

        let images = ImageSettings {
            experiment_image: r.string("EXPERIMENT_IMAGE", "litmuschaos/go-runner:ci"),
            operator_image: r.string("OPERATOR_IMAGE", "litmuschaos/chaos-operator:ci"),
            runner_image: r.string("RUNNER_IMAGE", "litmuschaos/chaos-runner:ci"),
            image_pull_policy: r.string("IMAGE_PULL_POLICY", "Always"),
        };

        let hub = HubLinks {
            rbac_path: r.string("RBAC_PATH", &hub_chart_url(experiment, "rbac.yaml")),
            engine_path: r.string("ENGINE_PATH", &hub_chart_url(experiment, "engine.yaml")),
            install_litmus_url: r.string(
                "INSTALL_LITMUS_URL",
                "https://litmuschaos.github.io/litmus/litmus-operator-latest.yaml",
            ),
        };

        let control_plane = ControlPlaneSettings {
            install_chaos_center: r.flag("INSTALL_CHAOS_CENTER", false),
            connect_infra: r.flag("CONNECT_INFRA", false),
            endpoint: r.string("LITMUS_ENDPOINT", ""),
            username: r.string("LITMUS_USERNAME", ""),
            password: r.secret("LITMUS_PASSWORD"),
            project_id: r.string("LITMUS_PROJECT_ID", ""),
        };

        let infra = InfraSettings {
            name: r.string("INFRA_NAME", &format!("ci-infra-{experiment}")),
            namespace: r.string("INFRA_NAMESPACE", "litmus"),
            scope: r.string("INFRA_SCOPE", "namespace"),
            service_account: r.string("INFRA_SERVICE_ACCOUNT", "litmus"),
            description: r.string("INFRA_DESCRIPTION", "CI Test Infrastructure"),
            platform_name: r.string("INFRA_PLATFORM_NAME", "others"),
            environment_id: r.string("INFRA_ENVIRONMENT_ID", ""),
            ns_exists: r.flag("INFRA_NS_EXISTS", false),
            sa_exists: r.flag("INFRA_SA_EXISTS", false),
            skip_ssl: r.flag("INFRA_SKIP_SSL", false),
            node_selector: r.optional("INFRA_NODE_SELECTOR"),
            tolerations: r.optional("INFRA_TOLERATIONS"),
            install_infra: r.flag("INSTALL_INFRA", true),
            use_existing_infra: r.flag("USE_EXISTING_INFRA", false),
            existing_infra_id: r.optional("EXISTING_INFRA_ID"),
            activate_infra: r.flag("ACTIVATE_INFRA", true),
            activation_timeout: r.duration("INFRA_ACTIVATION_TIMEOUT", MINUTE * 5, MINUTE),
        };

        let env_type = r
            .parser
            .get_choice("ENV_TYPE", "NON_PROD", &["PROD", "NON_PROD"]);
        r.record("ENV_TYPE", &env_type);
        let environment = EnvironmentSettings {
            use_existing: r.flag("USE_EXISTING_ENV", false),
            existing_id: r.optional("EXISTING_ENV_ID"),
            name: r.string("ENV_NAME", "chaos-ci-env"),
            kind: EnvironmentType::parse(&env_type.value).unwrap_or_default(),
            description: r.string("ENV_DESCRIPTION", "CI Test Environment"),
        };

        let probe = ProbeSettings {
            create: r.flag("LITMUS_CREATE_PROBE", false),
            kind: r.string("LITMUS_PROBE_TYPE", "httpProbe"),
            name: r.string("LITMUS_PROBE_NAME", "http-probe"),
            mode: r.string("LITMUS_PROBE_MODE", "SOT"),
            url: r.string("LITMUS_PROBE_URL", "http://localhost:8080/health"),
            timeout: r.string("LITMUS_PROBE_TIMEOUT", "30s"),
            interval: r.string("LITMUS_PROBE_INTERVAL", "10s"),
            attempts: r.number("LITMUS_PROBE_ATTEMPTS", 1, 100),
            response_code: r.string("LITMUS_PROBE_RESPONSE_CODE", "200"),
        };

        let mut parser = r.parser;
        LoadedDetails {
            details: ExperimentDetails {
                experiment_name: experiment.to_string(),
                engine_name: engine.to_string(),
                target,
                tunables,
                poll,
                images,
                hub,
                control_plane,
                infra,
                environment,
                probe,
            },
            entries: r.entries,
            errors: parser.take_errors(),
        }
    }
}

fn hub_chart_url(experiment: &str, file: &str) -> String {
    format!("https://hub.litmuschaos.io/api/chaos/master?file=charts/generic/{experiment}/{file}")
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;
    use std::env;

    const TOUCHED: &[&str] = &[
        "APP_NS",
        "TOTAL_CHAOS_DURATION",
        "EXPERIMENT_TIMEOUT",
        "EXPERIMENT_POLLING_INTERVAL",
        "ENV_TYPE",
        "LITMUS_PASSWORD",
        "INFRA_ACTIVATION_TIMEOUT",
        "FORCE",
        "CHAOS_SERVICE_ACCOUNT",
    ];

    fn clear() {
        for var in TOUCHED {
            // SAFETY: env access is serialised by env_test_lock.
            unsafe { env::remove_var(var) };
        }
    }

    fn set(key: &str, value: &str) {
        // SAFETY: env access is serialised by env_test_lock.
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_defaults_depend_on_experiment_name() {
        let _guard = env_test_lock();
        clear();

        let loaded = ExperimentDetails::from_env("pod-delete", "engine-1");
        let d = loaded.details;
        assert_eq!(d.target.chaos_service_account, "pod-delete-sa");
        assert_eq!(d.infra.name, "ci-infra-pod-delete");
        assert!(d.hub.rbac_path.ends_with("charts/generic/pod-delete/rbac.yaml"));
        assert_eq!(d.poll, PollSettings::default());
        assert_eq!(d.environment.kind, EnvironmentType::NonProd);
        assert_eq!(d.infra.activation_timeout, Duration::from_secs(300));
        assert!(loaded.errors.is_empty());
    }

    #[test]
    fn test_overrides_and_errors_are_collected() {
        let _guard = env_test_lock();
        clear();
        set("APP_NS", "shop");
        set("TOTAL_CHAOS_DURATION", "120");
        set("EXPERIMENT_TIMEOUT", "0");
        set("EXPERIMENT_POLLING_INTERVAL", "2");
        set("ENV_TYPE", "QA");
        set("FORCE", "true");

        let loaded = ExperimentDetails::from_env("pod-delete", "engine-1");
        let d = &loaded.details;
        assert_eq!(d.target.app_ns, "shop");
        assert_eq!(d.tunables.chaos_duration_secs, 120);
        assert!(d.tunables.force);
        assert_eq!(d.poll.experiment_timeout, Duration::from_secs(8 * 60));
        assert_eq!(d.poll.polling_interval, Duration::from_secs(2));
        assert_eq!(d.environment.kind, EnvironmentType::NonProd);
        assert_eq!(loaded.errors.len(), 2);

        clear();
    }

    #[test]
    fn test_password_is_masked_in_report() {
        let _guard = env_test_lock();
        clear();
        set("LITMUS_PASSWORD", "s3cret");

        let loaded = ExperimentDetails::from_env("pod-delete", "engine-1");
        assert_eq!(loaded.details.control_plane.password, "s3cret");
        let entry = loaded
            .entries
            .iter()
            .find(|e| e.name == "LITMUS_PASSWORD")
            .unwrap();
        assert_eq!(entry.value, "********");
        assert!(!format!("{:?}", loaded.details.control_plane).contains("s3cret"));

        clear();
    }

    #[test]
    fn test_poll_requests_use_configured_timing() {
        let settings = PollSettings {
            experiment_timeout: Duration::from_secs(600),
            polling_interval: Duration::from_secs(20),
            native_timeout: Duration::from_secs(90),
            native_interval: Duration::from_secs(5),
        };
        let remote = settings.request_for("run r1", StateSet::experiment_run());
        assert_eq!(remote.timeout, Duration::from_secs(600));
        assert_eq!(remote.poll_interval, Duration::from_secs(20));

        let native = settings.native_request_for("engine e1", StateSet::chaos_engine());
        assert_eq!(native.timeout, Duration::from_secs(90));
        assert_eq!(native.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_probe_request_carries_http_criteria() {
        let probe = ProbeSettings {
            create: true,
            kind: "httpProbe".to_string(),
            name: "http-probe".to_string(),
            mode: "SOT".to_string(),
            url: "http://app.default.svc:8080/health".to_string(),
            timeout: "30s".to_string(),
            interval: "10s".to_string(),
            attempts: 3,
            response_code: "200".to_string(),
        };
        let request = probe.to_request();
        assert_eq!(request.name, "http-probe");
        assert_eq!(request.http_properties.attempt, 3);
        assert_eq!(request.http_properties.method.get.criteria, "==");
        assert_eq!(request.http_properties.method.get.response_code, "200");
    }
}
