//! Shared library for chaos CI runs.
//!
//! The core is the completion poller in [`poll`]: every wait in a run
//! (runner pod, chaos pod, engine, result, remote run, infra activation,
//! operator rollout) is one poll over a [`status::StatusSource`]. Around it
//! sit the collaborators a run needs: typed manifests, the control-plane
//! client, infra setup, installation and log collection.

pub mod config;
pub mod control_plane;
pub mod crd;
pub mod error;
pub mod exec;
pub mod infra;
pub mod install;
pub mod kube_client;
pub mod logging;
pub mod logs;
pub mod manifest;
pub mod naming;
pub mod poll;
pub mod retry;
pub mod status;
pub mod testing;
pub mod verdict;

pub use config::{EnvError, EnvParser, ExperimentDetails, LoadedDetails};
pub use control_plane::{ControlPlaneClient, ControlPlaneError};
pub use error::ChaosCiError;
pub use infra::{ConnectedInfra, InfraError};
pub use logging::{LogConfig, LoggingGuards, init_logging};
pub use manifest::{EngineBuilder, FaultKind, ManifestError, WorkflowBuilder};
pub use poll::{
    PollError, PollPhase, PollRequest, PollResult, StateSet, TerminalOutcome, poll_all,
    poll_until_cancelled, poll_until_terminal,
};
pub use status::{FetchError, RunLocator, StatusSource, poll_source};
pub use verdict::VerdictError;
