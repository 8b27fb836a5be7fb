//! `wait-run`: follow a run that something else started.

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use chaos_ci_common::verdict::wait_remote_run;
use chaos_ci_common::{RunLocator, StateSet};

use super::{connect_control_plane, interrupted, load_details, print_failed, print_passed};

/// Exactly one of the identifiers must be given.
pub fn locator(
    run_id: Option<String>,
    notify_id: Option<String>,
    experiment_id: Option<String>,
) -> Result<RunLocator> {
    match (run_id, notify_id, experiment_id) {
        (Some(id), None, None) => Ok(RunLocator::RunId(id)),
        (None, Some(id), None) => Ok(RunLocator::NotifyId(id)),
        (None, None, Some(id)) => Ok(RunLocator::LatestOfExperiment(id)),
        (None, None, None) => bail!("one of --run-id, --notify-id or --experiment-id is required"),
        _ => bail!("--run-id, --notify-id and --experiment-id are mutually exclusive"),
    }
}

pub async fn wait_run(
    locator: RunLocator,
    timeout: Option<Duration>,
    interval: Option<Duration>,
) -> Result<()> {
    let details = load_details("wait-run", "wait-run");
    let client = connect_control_plane(&details.control_plane).await?;

    let what = locator.to_string();
    let mut request = details
        .poll
        .request_for(what.clone(), StateSet::experiment_run());
    if let Some(timeout) = timeout {
        request = request.with_timeout(timeout);
    }
    if let Some(interval) = interval {
        request = request.with_interval(interval);
    }

    let started = Instant::now();
    match wait_remote_run(&client, locator, &request, interrupted()).await {
        Ok(outcome) => {
            print_passed(&format!("{what} ({})", outcome.state), started.elapsed());
            Ok(())
        }
        Err(err) => {
            print_failed(&what, &err.to_string());
            Err(err.into())
        }
    }
}
