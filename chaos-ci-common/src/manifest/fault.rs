//! Fault catalogue and the experiment environment each fault consumes.

use std::fmt;
use std::str::FromStr;

use super::ManifestError;
use crate::config::FaultTunables;
use crate::crd::EnvPair;

/// A chaos fault the harness knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    PodDelete,
    ContainerKill,
    PodCpuHog,
    NodeCpuHog,
    NodeMemoryHog,
    NodeIoStress,
    PodNetworkLatency,
    PodNetworkLoss,
    PodNetworkCorruption,
    PodNetworkDuplication,
    DiskFill,
    PodAutoscaler,
}

impl FaultKind {
    pub const ALL: [FaultKind; 12] = [
        Self::PodDelete,
        Self::ContainerKill,
        Self::PodCpuHog,
        Self::NodeCpuHog,
        Self::NodeMemoryHog,
        Self::NodeIoStress,
        Self::PodNetworkLatency,
        Self::PodNetworkLoss,
        Self::PodNetworkCorruption,
        Self::PodNetworkDuplication,
        Self::DiskFill,
        Self::PodAutoscaler,
    ];

    /// Experiment name as published on the chaos hub.
    pub fn name(self) -> &'static str {
        match self {
            Self::PodDelete => "pod-delete",
            Self::ContainerKill => "container-kill",
            Self::PodCpuHog => "pod-cpu-hog",
            Self::NodeCpuHog => "node-cpu-hog",
            Self::NodeMemoryHog => "node-memory-hog",
            Self::NodeIoStress => "node-io-stress",
            Self::PodNetworkLatency => "pod-network-latency",
            Self::PodNetworkLoss => "pod-network-loss",
            Self::PodNetworkCorruption => "pod-network-corruption",
            Self::PodNetworkDuplication => "pod-network-duplication",
            Self::DiskFill => "disk-fill",
            Self::PodAutoscaler => "pod-autoscaler",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ManifestError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| ManifestError::UnknownFault(name.to_string()))
    }

    /// Node-level faults target nodes rather than application pods.
    pub fn targets_nodes(self) -> bool {
        matches!(
            self,
            Self::NodeCpuHog | Self::NodeMemoryHog | Self::NodeIoStress
        )
    }

    fn is_network(self) -> bool {
        matches!(
            self,
            Self::PodNetworkLatency
                | Self::PodNetworkLoss
                | Self::PodNetworkCorruption
                | Self::PodNetworkDuplication
        )
    }

    /// Experiment env entries for this fault. Entries with an empty value are
    /// left out so the experiment's own defaults apply.
    pub fn experiment_env(self, t: &FaultTunables, target_node: &str) -> Vec<EnvPair> {
        let mut env = EnvBuilder::default();
        env.set("TOTAL_CHAOS_DURATION", t.chaos_duration_secs.to_string())
            .set("CHAOS_INTERVAL", t.chaos_interval_secs.to_string());

        if self.is_network() {
            env.set("CONTAINER_RUNTIME", &t.container_runtime)
                .set("SOCKET_PATH", &t.socket_path)
                .set("TARGET_PODS", &t.target_pods)
                .set("PODS_AFFECTED_PERC", t.pods_affected_perc.to_string())
                .set("NETWORK_INTERFACE", &t.network_interface);
        }
        if self.targets_nodes() {
            env.set("TARGET_NODES", target_node)
                .set("NODES_AFFECTED_PERC", t.nodes_affected_perc.to_string());
        }

        match self {
            Self::PodDelete => {
                env.set("FORCE", t.force.to_string())
                    .set("TARGET_PODS", &t.target_pods)
                    .set("PODS_AFFECTED_PERC", t.pods_affected_perc.to_string());
            }
            Self::ContainerKill => {
                env.set("CONTAINER_RUNTIME", &t.container_runtime)
                    .set("SOCKET_PATH", &t.socket_path)
                    .set("TARGET_CONTAINER", &t.target_container)
                    .set("TARGET_PODS", &t.target_pods);
            }
            Self::PodCpuHog => {
                env.set("CPU_CORES", t.cpu_cores.to_string())
                    .set("TARGET_CONTAINER", &t.target_container)
                    .set("TARGET_PODS", &t.target_pods)
                    .set("PODS_AFFECTED_PERC", t.pods_affected_perc.to_string());
            }
            Self::NodeCpuHog => {
                env.set("NODE_CPU_CORE", t.node_cpu_core.to_string());
            }
            Self::NodeMemoryHog => {
                env.set(
                    "MEMORY_CONSUMPTION_PERCENTAGE",
                    t.memory_consumption_percentage.to_string(),
                );
            }
            Self::NodeIoStress => {
                env.set(
                    "FILESYSTEM_UTILIZATION_PERCENTAGE",
                    t.filesystem_utilization_percentage.to_string(),
                );
                if let Some(bytes) = t.filesystem_utilization_bytes {
                    env.set("FILESYSTEM_UTILIZATION_BYTES", bytes.to_string());
                }
            }
            Self::PodNetworkLatency => {
                env.set("NETWORK_LATENCY", t.network_latency_ms.to_string());
            }
            Self::PodNetworkLoss => {
                env.set(
                    "NETWORK_PACKET_LOSS_PERCENTAGE",
                    t.packet_loss_percentage.to_string(),
                );
            }
            Self::PodNetworkCorruption => {
                env.set(
                    "NETWORK_PACKET_CORRUPTION_PERCENTAGE",
                    t.packet_corruption_percentage.to_string(),
                );
            }
            Self::PodNetworkDuplication => {
                env.set(
                    "NETWORK_PACKET_DUPLICATION_PERCENTAGE",
                    t.packet_duplication_percentage.to_string(),
                );
            }
            Self::DiskFill => {
                env.set("FILL_PERCENTAGE", t.fill_percentage.to_string())
                    .set("TARGET_CONTAINER", &t.target_container);
            }
            Self::PodAutoscaler => {
                env.set("REPLICA_COUNT", t.replica_count.to_string());
            }
        }

        env.into_pairs()
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FaultKind {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Ordered env entries; setting a name twice keeps the last value.
#[derive(Default)]
struct EnvBuilder {
    pairs: Vec<EnvPair>,
}

impl EnvBuilder {
    fn set(&mut self, name: &str, value: impl AsRef<str>) -> &mut Self {
        let value = value.as_ref();
        if value.is_empty() {
            return self;
        }
        match self.pairs.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.pairs.push(EnvPair::new(name, value)),
        }
        self
    }

    fn into_pairs(self) -> Vec<EnvPair> {
        self.pairs
    }
}
