//! Completion poller.
//!
//! Repeatedly reads the status of an asynchronously running resource until
//! it reports a terminal label or the timeout elapses. Every wait in the
//! harness (ChaosEngine state, ChaosResult phase, runner pod phase, remote
//! experiment-run phase, infra activation) goes through this one loop with a
//! different fetch function and [`StateSet`].
//!
//! Timing follows a repeating ticker: the first fetch happens one interval
//! after the session starts. Fetch failures are logged and the session keeps
//! going; only the deadline (or an explicit cancel signal) ends a session
//! without a terminal label.

pub mod states;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, warn};

pub use states::{StateSet, StateSetError};

/// Default gap between two status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Default time budget for one polling session.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(8 * 60);
/// Intervals below this are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a session ended without a terminal label.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error(
        "timed out after {} waiting for {resource} to reach a terminal state (last observed: {})",
        format_timeout(.timeout),
        last_label(.last_observed)
    )]
    TimedOut {
        resource: String,
        timeout: Duration,
        last_observed: Option<String>,
    },

    #[error(
        "polling {resource} was cancelled (last observed: {})",
        last_label(.last_observed)
    )]
    Cancelled {
        resource: String,
        last_observed: Option<String>,
    },
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}

fn last_label(label: &Option<String>) -> &str {
    label.as_deref().unwrap_or("nothing")
}

impl PollError {
    /// Last non-terminal label seen before the session ended, if any.
    pub fn last_observed(&self) -> Option<&str> {
        match self {
            Self::TimedOut { last_observed, .. } | Self::Cancelled { last_observed, .. } => {
                last_observed.as_deref()
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Lifecycle of one polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Started, first tick not reached yet.
    Waiting,
    /// At least one fetch issued, no terminal label yet.
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl PollPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting | Self::Polling)
    }
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Polling => write!(f, "polling"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One polling session: what to watch, how often, for how long, and which
/// labels end it.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub resource_id: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub states: StateSet,
}

impl PollRequest {
    pub fn new(resource_id: impl Into<String>, states: StateSet) -> Self {
        Self {
            resource_id: resource_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            states,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn effective_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

/// A terminal label and its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutcome {
    pub state: String,
    pub succeeded: bool,
}

/// Outcome of a polling session.
///
/// Either `error` is `None` and `final_state` holds a terminal label, or
/// `error` is set and `final_state` is empty. The constructors are the only
/// way to build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    resource_id: String,
    final_state: String,
    succeeded: bool,
    error: Option<PollError>,
    attempts: u32,
    fetch_failures: u32,
    elapsed: Duration,
}

impl PollResult {
    fn terminal(session: &Session<'_>, state: String) -> Self {
        let succeeded = session.request.states.is_success(&state);
        Self {
            resource_id: session.request.resource_id.clone(),
            final_state: state,
            succeeded,
            error: None,
            attempts: session.attempts,
            fetch_failures: session.fetch_failures,
            elapsed: session.started.elapsed(),
        }
    }

    fn unfinished(session: &Session<'_>, error: PollError) -> Self {
        Self {
            resource_id: session.request.resource_id.clone(),
            final_state: String::new(),
            succeeded: false,
            error: Some(error),
            attempts: session.attempts,
            fetch_failures: session.fetch_failures,
            elapsed: session.started.elapsed(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Terminal label observed, empty when the session timed out or was cancelled.
    pub fn final_state(&self) -> &str {
        &self.final_state
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn error(&self) -> Option<&PollError> {
        self.error.as_ref()
    }

    /// Number of fetches issued, including failed and abandoned ones.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn fetch_failures(&self) -> u32 {
        self.fetch_failures
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn phase(&self) -> PollPhase {
        match &self.error {
            Some(PollError::TimedOut { .. }) => PollPhase::TimedOut,
            Some(PollError::Cancelled { .. }) => PollPhase::Cancelled,
            None if self.succeeded => PollPhase::Succeeded,
            None => PollPhase::Failed,
        }
    }

    /// Split into the terminal outcome or the reason there is none.
    pub fn into_outcome(self) -> Result<TerminalOutcome, PollError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(TerminalOutcome {
                state: self.final_state,
                succeeded: self.succeeded,
            }),
        }
    }
}

struct Session<'a> {
    request: &'a PollRequest,
    started: Instant,
    phase: PollPhase,
    attempts: u32,
    fetch_failures: u32,
    last_observed: Option<String>,
}

impl<'a> Session<'a> {
    fn new(request: &'a PollRequest) -> Self {
        Self {
            request,
            started: Instant::now(),
            phase: PollPhase::Waiting,
            attempts: 0,
            fetch_failures: 0,
            last_observed: None,
        }
    }

    fn transition(&mut self, next: PollPhase) {
        if self.phase != next {
            debug!(
                resource = %self.request.resource_id,
                from = %self.phase,
                to = %next,
                "Poll phase transition"
            );
            self.phase = next;
        }
    }

    fn observe(&mut self, state: String) {
        if self.last_observed.as_deref() != Some(state.as_str()) {
            info!(
                resource = %self.request.resource_id,
                attempt = self.attempts,
                state = %state,
                "Observed non-terminal state"
            );
        } else {
            debug!(
                resource = %self.request.resource_id,
                attempt = self.attempts,
                state = %state,
                "State unchanged"
            );
        }
        self.last_observed = Some(state);
    }

    fn finish_terminal(mut self, state: String) -> PollResult {
        let result = PollResult::terminal(&self, state);
        self.transition(result.phase());
        info!(
            resource = %self.request.resource_id,
            state = %result.final_state,
            succeeded = result.succeeded,
            attempts = result.attempts,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Reached terminal state"
        );
        result
    }

    fn finish_timed_out(mut self) -> PollResult {
        let err = PollError::TimedOut {
            resource: self.request.resource_id.clone(),
            timeout: self.request.timeout,
            last_observed: self.last_observed.take(),
        };
        self.transition(PollPhase::TimedOut);
        error!(
            resource = %self.request.resource_id,
            attempts = self.attempts,
            fetch_failures = self.fetch_failures,
            "{err}"
        );
        PollResult::unfinished(&self, err)
    }

    fn finish_cancelled(mut self) -> PollResult {
        let err = PollError::Cancelled {
            resource: self.request.resource_id.clone(),
            last_observed: self.last_observed.take(),
        };
        self.transition(PollPhase::Cancelled);
        warn!(resource = %self.request.resource_id, attempts = self.attempts, "{err}");
        PollResult::unfinished(&self, err)
    }
}

/// Poll `fetch` until it returns a terminal label or the request times out.
pub async fn poll_until_terminal<F, Fut, E>(request: &PollRequest, fetch: F) -> PollResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: fmt::Display,
{
    poll_until_cancelled(request, fetch, std::future::pending::<()>()).await
}

/// Like [`poll_until_terminal`], but also stops as soon as `cancel` resolves.
///
/// When the deadline, the cancel signal and a tick are ready at the same
/// instant, the deadline wins, then the cancel signal. A fetch still in
/// flight when either fires is dropped.
pub async fn poll_until_cancelled<F, Fut, E, C>(
    request: &PollRequest,
    mut fetch: F,
    cancel: C,
) -> PollResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: fmt::Display,
    C: Future<Output = ()>,
{
    let mut session = Session::new(request);
    let period = request.effective_interval();

    let deadline = sleep(request.timeout);
    tokio::pin!(deadline);
    tokio::pin!(cancel);

    let mut ticker = interval_at(session.started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        resource = %request.resource_id,
        interval_ms = period.as_millis() as u64,
        timeout_ms = request.timeout.as_millis() as u64,
        states = %request.states,
        "Starting completion poll"
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => return session.finish_timed_out(),
            _ = &mut cancel => return session.finish_cancelled(),
            _ = ticker.tick() => {}
        }

        session.transition(PollPhase::Polling);
        session.attempts += 1;

        let fetched = tokio::select! {
            biased;
            _ = &mut deadline => return session.finish_timed_out(),
            _ = &mut cancel => return session.finish_cancelled(),
            fetched = fetch() => fetched,
        };

        match fetched {
            Ok(state) if request.states.is_terminal(&state) => {
                return session.finish_terminal(state);
            }
            Ok(state) => session.observe(state),
            Err(err) => {
                session.fetch_failures += 1;
                warn!(
                    resource = %request.resource_id,
                    attempt = session.attempts,
                    error = %err,
                    "Status fetch failed, retrying on next tick"
                );
            }
        }
    }
}

/// Run independent polling sessions concurrently, one task each.
///
/// Results come back in submission order.
pub async fn poll_all<I, Fut>(sessions: I) -> Vec<PollResult>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = PollResult> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut count = 0;
    for (idx, session) in sessions.into_iter().enumerate() {
        set.spawn(async move { (idx, session.await) });
        count += 1;
    }

    let mut slots: Vec<Option<PollResult>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, result)) => slots[idx] = Some(result),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => warn!(error = %err, "Polling task ended without a result"),
        }
    }
    slots.into_iter().flatten().collect()
}
