//! Subcommand implementations.

pub mod config;
pub mod install;
pub mod remote;
pub mod run;
pub mod wait;

use anyhow::{Context, Result, bail};
use chaos_ci_common::config::ControlPlaneSettings;
use chaos_ci_common::retry::{RetryPolicy, run_with_retry};
use chaos_ci_common::{ControlPlaneClient, ExperimentDetails, FaultKind};
use clap::Command;
use clap_complete::Shell;
use colored::Colorize;
use std::time::Duration;
use tracing::{info, warn};

/// Resolve the run configuration, logging every invalid variable.
pub fn load_details(experiment: &str, engine: &str) -> ExperimentDetails {
    let loaded = ExperimentDetails::from_env(experiment, engine);
    for err in &loaded.errors {
        warn!(error = %err, "Invalid configuration value, using default");
    }
    loaded.details
}

pub fn parse_fault(name: &str) -> Result<FaultKind> {
    FaultKind::from_name(name).with_context(|| format!("cannot run fault {name:?}"))
}

/// Resolves on Ctrl-C. Never resolves when the signal handler cannot be
/// installed, so a missing handler does not cancel the run.
pub async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Interrupted, stopping the wait"),
        Err(err) => {
            warn!(error = %err, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

/// Log in to the control plane named by `settings`.
pub async fn connect_control_plane(settings: &ControlPlaneSettings) -> Result<ControlPlaneClient> {
    if settings.endpoint.is_empty() {
        bail!("LITMUS_ENDPOINT is not set");
    }
    if settings.username.is_empty() || settings.password.is_empty() {
        bail!("LITMUS_USERNAME and LITMUS_PASSWORD must both be set");
    }
    let client = run_with_retry("login", &RetryPolicy::default(), || {
        ControlPlaneClient::login(&settings.endpoint, &settings.username, &settings.password)
    })
    .await
    .with_context(|| format!("failed to log in to {}", settings.endpoint))?;
    let client = client.with_project_id(&settings.project_id);
    info!(endpoint = client.endpoint(), "Connected to control plane");
    Ok(client)
}

pub fn completions(shell: Shell, command: &mut Command) {
    let name = command.get_name().to_string();
    clap_complete::generate(shell, command, name, &mut std::io::stdout());
}

pub fn print_passed(what: &str, elapsed: Duration) {
    println!(
        "{} {} ({})",
        "PASS".green().bold(),
        what,
        humantime::format_duration(round_secs(elapsed))
    );
}

pub fn print_failed(what: &str, reason: &str) {
    println!("{} {}: {}", "FAIL".red().bold(), what, reason);
}

fn round_secs(elapsed: Duration) -> Duration {
    Duration::from_secs(elapsed.as_secs())
}
