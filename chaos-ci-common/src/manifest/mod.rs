//! Manifest construction for both submission paths.
//!
//! The native path creates a typed [`ChaosEngine`](crate::crd::ChaosEngine)
//! directly; the control-plane path wraps the same engine in an Argo
//! workflow. Callers only need the resulting name or ID to poll against.

pub mod engine;
pub mod fault;
pub mod workflow;

use thiserror::Error;

pub use engine::{EngineBuilder, engine_yaml};
pub use fault::FaultKind;
pub use workflow::{Workflow, WorkflowBuilder};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("unknown fault {0:?}")]
    UnknownFault(String),

    #[error("manifest is missing {0}")]
    MissingField(&'static str),

    #[error("failed to serialize manifest: {0}")]
    Serialize(String),
}
