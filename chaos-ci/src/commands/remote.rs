//! `run-remote`: run a fault as a control-plane experiment on connected
//! infra.

use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chaos_ci_common::infra::{ConnectedInfra, disconnect_infrastructure, setup_infrastructure};
use chaos_ci_common::verdict::wait_remote_run;
use chaos_ci_common::{
    ControlPlaneClient, ExperimentDetails, FaultKind, RunLocator, StateSet, WorkflowBuilder, naming,
};
use tracing::{info, warn};

use super::{connect_control_plane, interrupted, load_details, parse_fault, print_failed, print_passed};

pub async fn run_remote(fault_name: &str, name: Option<String>) -> Result<()> {
    let fault = parse_fault(fault_name)?;
    let name = name.unwrap_or_else(|| naming::unique_name(fault.name()));
    let details = load_details(fault.name(), &name);

    let client = connect_control_plane(&details.control_plane).await?;
    let infra = setup_infrastructure(&client, &details.infra, &details.environment)
        .await
        .context("failed to set up chaos infra")?;

    let started = Instant::now();
    let outcome = match &infra {
        Some(infra) => run_on_infra(&client, fault, &name, infra, &details).await,
        None => Err(anyhow!(
            "no chaos infra to run on; enable INSTALL_INFRA or set EXISTING_INFRA_ID"
        )),
    };

    if let Err(err) = disconnect_infrastructure(&client, infra.as_ref()).await {
        warn!(error = %err, "Failed to disconnect infra");
    }

    match outcome {
        Ok(state) => {
            print_passed(&format!("{name} ({state})"), started.elapsed());
            Ok(())
        }
        Err(err) => {
            print_failed(&name, &format!("{err:#}"));
            Err(err)
        }
    }
}

/// Save the experiment, trigger it and wait for the run. Returns the
/// terminal run phase.
async fn run_on_infra(
    client: &ControlPlaneClient,
    fault: FaultKind,
    name: &str,
    infra: &ConnectedInfra,
    details: &ExperimentDetails,
) -> Result<String> {
    let target = &details.target;
    let mut workflow = WorkflowBuilder::new(fault, name)
        .app(&target.app_ns, &target.app_label, &target.app_kind)
        .timing(
            details.tunables.chaos_duration_secs,
            details.tunables.chaos_interval_secs,
        );

    if details.probe.create {
        let probe = client
            .add_probe(&details.probe.to_request())
            .await
            .context("failed to register probe")?;
        workflow = workflow.probe(&probe, &details.probe.mode);
    }

    let experiment_id = naming::short_id();
    let request = workflow.save_request(&experiment_id, &infra.id)?;
    client
        .save_experiment(&request)
        .await
        .with_context(|| format!("failed to save experiment {name}"))?;
    let notify_id = client
        .run_experiment(&experiment_id)
        .await
        .with_context(|| format!("failed to start experiment {name}"))?;
    info!(experiment_id = %experiment_id, notify_id = %notify_id, infra = %infra.id, "Experiment started");

    let locator = RunLocator::NotifyId(notify_id);
    let poll = details
        .poll
        .request_for(locator.to_string(), StateSet::experiment_run());
    let outcome = wait_remote_run(client, locator, &poll, interrupted()).await?;
    Ok(outcome.state)
}
