//! Configuration read from the CI job environment.
//!
//! - [`EnvParser`]: typed, error-collecting variable access
//! - [`Sourced`]: a value with its origin, for the `config` report
//! - [`ExperimentDetails`]: everything one experiment run needs

pub mod details;
pub mod env;
pub mod source;

pub use details::{
    ControlPlaneSettings, EnvironmentSettings, ExperimentDetails, FaultTunables, HubLinks,
    ImageSettings, InfraSettings, LoadedDetails, PollSettings, ProbeSettings, TargetSettings,
};
pub use env::{EnvError, EnvParser};
pub use source::{ConfigEntry, ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
