//! `run`: inject a fault through a ChaosEngine created directly in the
//! cluster and gate on its verdicts.

use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chaos_ci_common::crd::ChaosEngine;
use chaos_ci_common::install::install_rbac;
use chaos_ci_common::logs::{ChaosLogs, chaos_pod_logs};
use chaos_ci_common::{EngineBuilder, ExperimentDetails, FaultKind, kube_client, naming, verdict};
use colored::Colorize;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

use super::{interrupted, load_details, parse_fault, print_failed, print_passed};

pub struct RunOptions {
    pub engine: Option<String>,
    pub skip_rbac: bool,
    pub keep_engine: bool,
}

pub async fn run(fault_name: &str, options: RunOptions, kubeconfig: Option<&str>) -> Result<()> {
    let fault = parse_fault(fault_name)?;
    let engine_name = options
        .engine
        .unwrap_or_else(|| naming::unique_name(fault.name()));
    let details = load_details(fault.name(), &engine_name);
    let client = kube_client::connect(kubeconfig).await?;

    if !options.skip_rbac {
        install_rbac(
            &details.hub.rbac_path,
            &details.target.chaos_namespace,
            fault.name(),
        )
        .await
        .context("failed to install experiment RBAC")?;
    }

    verdict::wait_app_running(&client, &details).await?;
    create_engine(&client, fault, &details).await?;
    let started = Instant::now();

    let (outcome, was_interrupted) = tokio::select! {
        outcome = await_verdicts(&client, &details) => (outcome, false),
        () = interrupted() => (Err(anyhow!("interrupted while waiting for {engine_name}")), true),
    };

    if outcome.is_err() {
        dump_logs(&client, &details, was_interrupted).await;
    }
    if options.keep_engine {
        info!(engine = %engine_name, "Keeping ChaosEngine");
    } else {
        delete_engine(&client, &details).await;
    }

    let what = format!("{} ({engine_name})", fault.name());
    match outcome {
        Ok(()) => {
            print_passed(&what, started.elapsed());
            Ok(())
        }
        Err(err) => {
            print_failed(&what, &format!("{err:#}"));
            Err(err)
        }
    }
}

async fn create_engine(client: &Client, fault: FaultKind, details: &ExperimentDetails) -> Result<()> {
    let engine = EngineBuilder::from_details(fault, details).build()?;
    let api: Api<ChaosEngine> = Api::namespaced(client.clone(), &details.target.chaos_namespace);
    api.create(&PostParams::default(), &engine)
        .await
        .with_context(|| format!("failed to create ChaosEngine {}", details.engine_name))?;
    info!(
        engine = %details.engine_name,
        namespace = %details.target.chaos_namespace,
        "Created ChaosEngine"
    );
    Ok(())
}

/// Runner up, chaos pod started, both verdicts, then the runner exit.
async fn await_verdicts(client: &Client, details: &ExperimentDetails) -> Result<()> {
    verdict::wait_runner_running(client, details).await?;
    verdict::wait_chaos_pod_started(client, details).await?;
    verdict::chaos_result_verdict(client, details).await?;
    verdict::chaos_engine_verdict(client, details).await?;
    if details.target.job_cleanup_policy != "delete" {
        verdict::wait_runner_completion(client, details).await?;
    }
    Ok(())
}

/// After an interrupt the logs are read as they stand; otherwise the chaos
/// pod is given until it finishes or the next Ctrl-C.
async fn dump_logs(client: &Client, details: &ExperimentDetails, was_interrupted: bool) {
    let collected = if was_interrupted {
        chaos_pod_logs(client, details, std::future::ready(())).await
    } else {
        chaos_pod_logs(client, details, interrupted()).await
    };
    match collected {
        Ok(logs) => print_logs(&logs),
        Err(err) => warn!(error = %err, "Could not collect chaos pod logs"),
    }
}

fn print_logs(logs: &ChaosLogs) {
    let pods = logs.chaos_pod.iter().chain(&logs.helpers);
    for pod in pods {
        eprintln!("{}", format!("--- logs of {} ---", pod.pod).bold());
        eprintln!("{}", pod.logs.trim_end());
    }
    for (pod, reason) in &logs.unreadable {
        eprintln!("{} {pod}: {reason}", "unreadable:".yellow());
    }
}

async fn delete_engine(client: &Client, details: &ExperimentDetails) {
    let api: Api<ChaosEngine> = Api::namespaced(client.clone(), &details.target.chaos_namespace);
    match api.delete(&details.engine_name, &DeleteParams::default()).await {
        Ok(_) => info!(engine = %details.engine_name, "Deleted ChaosEngine"),
        Err(err) => warn!(engine = %details.engine_name, error = %err, "Failed to delete ChaosEngine"),
    }
}
