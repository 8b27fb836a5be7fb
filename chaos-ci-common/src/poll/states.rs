//! State-label vocabularies for the completion poller.
//!
//! Every status source reports a plain string label. A [`StateSet`] says
//! which of those labels end a poll and which of the ending labels count as
//! a pass. Presets cover each source the harness watches.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

/// Remote experiment-run phase: completed without faults.
pub const COMPLETED: &str = "Completed";
/// Remote experiment-run phase: completed but a step reported an error.
pub const COMPLETED_WITH_ERROR: &str = "Completed_With_Error";
pub const FAILED: &str = "Failed";
pub const ERROR: &str = "Error";
pub const STOPPED: &str = "Stopped";
pub const SKIPPED: &str = "Skipped";
pub const ABORTED: &str = "Aborted";
pub const TIMEOUT: &str = "Timeout";
pub const TERMINATED: &str = "Terminated";

/// Every terminal phase a remote experiment run can report.
pub const EXPERIMENT_RUN_TERMINAL_PHASES: [&str; 9] = [
    COMPLETED,
    COMPLETED_WITH_ERROR,
    FAILED,
    ERROR,
    STOPPED,
    SKIPPED,
    ABORTED,
    TIMEOUT,
    TERMINATED,
];

/// Label reported by infra sources once the control plane sees the agent.
pub const INFRA_ACTIVE: &str = "Active";
/// Label reported by infra sources while the agent is not connected.
pub const INFRA_INACTIVE: &str = "Inactive";
/// Label reported by deployment sources once no replica is unavailable.
pub const DEPLOYMENT_READY: &str = "Ready";
/// Label reported by deployment sources while replicas are unavailable.
pub const DEPLOYMENT_PROGRESSING: &str = "Progressing";

/// Invalid state-set construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateSetError {
    #[error("terminal state set must not be empty")]
    EmptyTerminal,

    #[error("success state '{0}' is not a terminal state")]
    SuccessNotTerminal(String),
}

/// Terminal and success labels for one polling session.
///
/// `success` is always a subset of `terminal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSet {
    terminal: BTreeSet<String>,
    success: BTreeSet<String>,
}

impl StateSet {
    /// Build a state set, rejecting an empty terminal set or a success
    /// label that would never end the poll.
    pub fn new<T, S>(terminal: T, success: S) -> Result<Self, StateSetError>
    where
        T: IntoIterator,
        T::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let terminal: BTreeSet<String> = terminal.into_iter().map(Into::into).collect();
        if terminal.is_empty() {
            return Err(StateSetError::EmptyTerminal);
        }
        let success: BTreeSet<String> = success.into_iter().map(Into::into).collect();
        if let Some(stray) = success.iter().find(|s| !terminal.contains(*s)) {
            return Err(StateSetError::SuccessNotTerminal(stray.clone()));
        }
        Ok(Self { terminal, success })
    }

    // Presets are built from constant slices that satisfy the invariants.
    fn preset(terminal: &[&str], success: &[&str]) -> Self {
        Self {
            terminal: terminal.iter().map(|s| s.to_string()).collect(),
            success: success.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Remote experiment-run phases. Only `Completed` passes.
    pub fn experiment_run() -> Self {
        Self::preset(&EXPERIMENT_RUN_TERMINAL_PHASES, &[COMPLETED])
    }

    /// ChaosEngine `status.engineStatus`.
    pub fn chaos_engine() -> Self {
        Self::preset(&["completed", "stopped"], &["completed"])
    }

    /// ChaosResult `status.experimentStatus.phase`.
    pub fn chaos_result() -> Self {
        Self::preset(&[COMPLETED, COMPLETED_WITH_ERROR, STOPPED, ERROR], &[COMPLETED])
    }

    /// Status of the first experiment recorded on a ChaosEngine.
    ///
    /// The chaos pod counts as started once it is running or already done.
    pub fn chaos_pod_started() -> Self {
        Self::preset(
            &["Running", COMPLETED, STOPPED, ABORTED, ERROR],
            &["Running", COMPLETED],
        )
    }

    /// Pod phase, waiting for the pod to run.
    pub fn pod_running() -> Self {
        Self::preset(
            &["Running", "Succeeded", "Failed", "Unknown"],
            &["Running"],
        )
    }

    /// Pod phase, waiting for the pod to finish.
    pub fn pod_completed() -> Self {
        Self::preset(&["Succeeded", "Failed"], &["Succeeded"])
    }

    /// Control-plane infrastructure activity.
    pub fn infra_active() -> Self {
        Self::preset(&[INFRA_ACTIVE], &[INFRA_ACTIVE])
    }

    /// Deployment readiness.
    pub fn deployment_ready() -> Self {
        Self::preset(&[DEPLOYMENT_READY], &[DEPLOYMENT_READY])
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal.contains(state)
    }

    pub fn is_success(&self, state: &str) -> bool {
        self.success.contains(state)
    }

    pub fn terminal(&self) -> impl Iterator<Item = &str> {
        self.terminal.iter().map(String::as_str)
    }

    pub fn success(&self) -> impl Iterator<Item = &str> {
        self.success.iter().map(String::as_str)
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terminal: Vec<&str> = self.terminal().collect();
        let success: Vec<&str> = self.success().collect();
        write!(
            f,
            "terminal=[{}] success=[{}]",
            terminal.join(","),
            success.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_run_only_completed_succeeds() {
        let states = StateSet::experiment_run();
        for phase in EXPERIMENT_RUN_TERMINAL_PHASES {
            assert!(states.is_terminal(phase), "{phase} should be terminal");
            assert_eq!(states.is_success(phase), phase == COMPLETED, "{phase}");
        }
        assert!(!states.is_terminal("Running"));
        assert!(!states.is_terminal("Queued"));
        assert!(!states.is_terminal(""));
    }

    #[test]
    fn test_completed_with_error_is_terminal_failure() {
        let states = StateSet::experiment_run();
        assert!(states.is_terminal(COMPLETED_WITH_ERROR));
        assert!(!states.is_success(COMPLETED_WITH_ERROR));
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        let run = StateSet::experiment_run();
        assert!(!run.is_terminal("completed"));

        let engine = StateSet::chaos_engine();
        assert!(engine.is_terminal("completed"));
        assert!(!engine.is_terminal(COMPLETED));
        assert!(!engine.is_terminal("initialized"));
    }

    #[test]
    fn test_new_rejects_empty_terminal() {
        let err = StateSet::new(Vec::<String>::new(), Vec::<String>::new()).unwrap_err();
        assert_eq!(err, StateSetError::EmptyTerminal);
    }

    #[test]
    fn test_new_rejects_success_outside_terminal() {
        let err = StateSet::new(["Done"], ["Passed"]).unwrap_err();
        assert_eq!(err, StateSetError::SuccessNotTerminal("Passed".to_string()));
    }

    #[test]
    fn test_new_allows_empty_success() {
        let states = StateSet::new(["Gone"], Vec::<String>::new()).unwrap();
        assert!(states.is_terminal("Gone"));
        assert!(!states.is_success("Gone"));
    }

    #[test]
    fn test_pod_presets() {
        let running = StateSet::pod_running();
        assert!(!running.is_terminal("Pending"));
        assert!(running.is_success("Running"));
        assert!(running.is_terminal("Succeeded"));
        assert!(!running.is_success("Succeeded"));

        let completed = StateSet::pod_completed();
        assert!(!completed.is_terminal("Running"));
        assert!(completed.is_success("Succeeded"));
        assert!(!completed.is_success("Failed"));
    }

    #[test]
    fn test_every_preset_keeps_success_within_terminal() {
        let presets = [
            StateSet::experiment_run(),
            StateSet::chaos_engine(),
            StateSet::chaos_result(),
            StateSet::chaos_pod_started(),
            StateSet::pod_running(),
            StateSet::pod_completed(),
            StateSet::infra_active(),
            StateSet::deployment_ready(),
        ];
        for preset in presets {
            for label in preset.success() {
                assert!(preset.is_terminal(label), "{preset}: {label}");
            }
        }
    }

    #[test]
    fn test_display_lists_both_sets() {
        let rendered = StateSet::infra_active().to_string();
        assert_eq!(rendered, "terminal=[Active] success=[Active]");
    }
}
