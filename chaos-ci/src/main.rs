//! Chaos CI - Litmus chaos experiments as CI gates
//!
//! Installs the Litmus operator, runs one fault against the target
//! application (directly as a ChaosEngine, or through the Litmus control
//! plane) and exits non-zero unless the run passed.

#![forbid(unsafe_code)]

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use chaos_ci_common::{LogConfig, init_logging};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chaos-ci")]
#[command(author, version, about = "Chaos CI - run Litmus chaos experiments and gate on their verdicts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Kubeconfig to use instead of the default lookup
    #[arg(long, global = true)]
    kubeconfig: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the Litmus operator and the experiments chart
    InstallLitmus,

    /// Remove chaos engines, the experiments chart and the operator
    UninstallLitmus,

    /// Run a fault as a ChaosEngine in the cluster
    Run {
        /// Fault to inject (e.g. pod-delete, pod-network-loss)
        fault: String,

        /// Engine name (default: <fault>-<random id>)
        #[arg(long)]
        engine: Option<String>,

        /// Skip applying the experiment RBAC manifest
        #[arg(long)]
        skip_rbac: bool,

        /// Leave the ChaosEngine in place after the run
        #[arg(long)]
        keep_engine: bool,
    },

    /// Run a fault through the Litmus control plane
    RunRemote {
        /// Fault to inject (e.g. pod-delete, pod-network-loss)
        fault: String,

        /// Experiment name (default: <fault>-<random id>)
        #[arg(long)]
        name: Option<String>,
    },

    /// Wait for an existing control-plane run to finish
    #[command(group(clap::ArgGroup::new("run").required(true)))]
    WaitRun {
        /// Experiment run ID
        #[arg(long, group = "run")]
        run_id: Option<String>,

        /// Notify ID returned when the run was triggered
        #[arg(long, group = "run")]
        notify_id: Option<String>,

        /// Wait for the latest run of this experiment
        #[arg(long, group = "run")]
        experiment_id: Option<String>,

        /// Override EXPERIMENT_TIMEOUT (e.g. "10m")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Override EXPERIMENT_POLLING_INTERVAL (e.g. "15s")
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },

    /// Show the resolved configuration and where each value came from
    Config {
        /// Experiment whose defaults to resolve
        #[arg(default_value = "pod-delete")]
        fault: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Exit non-zero when any variable is invalid
        #[arg(long)]
        strict: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum, ignore_case = true)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if cli.json_logs {
        log_config = log_config.with_json();
    }
    let _logging_guards = init_logging(&log_config)?;

    let kubeconfig = cli.kubeconfig.as_deref();
    match cli.command {
        Commands::InstallLitmus => commands::install::install(kubeconfig).await,
        Commands::UninstallLitmus => commands::install::uninstall().await,
        Commands::Run {
            fault,
            engine,
            skip_rbac,
            keep_engine,
        } => {
            let options = commands::run::RunOptions {
                engine,
                skip_rbac,
                keep_engine,
            };
            commands::run::run(&fault, options, kubeconfig).await
        }
        Commands::RunRemote { fault, name } => commands::remote::run_remote(&fault, name).await,
        Commands::WaitRun {
            run_id,
            notify_id,
            experiment_id,
            timeout,
            interval,
        } => {
            let locator = commands::wait::locator(run_id, notify_id, experiment_id)?;
            commands::wait::wait_run(locator, timeout, interval).await
        }
        Commands::Config {
            fault,
            json,
            strict,
        } => commands::config::show(&fault, json, strict),
        Commands::Completions { shell } => {
            commands::completions(shell, &mut <Cli as clap::CommandFactory>::command());
            Ok(())
        }
    }
}
