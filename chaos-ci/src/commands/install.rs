//! `install-litmus` / `uninstall-litmus`.

use anyhow::{Context, Result, bail};
use chaos_ci_common::install::{UninstallReport, install_litmus, uninstall_litmus};
use chaos_ci_common::kube_client;
use colored::Colorize;

use super::load_details;

const INSTALL_EXPERIMENT: &str = "install-litmus";

pub async fn install(kubeconfig: Option<&str>) -> Result<()> {
    let details = load_details(INSTALL_EXPERIMENT, INSTALL_EXPERIMENT);
    let client = kube_client::connect(kubeconfig).await?;
    install_litmus(&client, &details)
        .await
        .context("failed to install Litmus")?;
    println!("{} Litmus installed", "OK".green().bold());
    Ok(())
}

pub async fn uninstall() -> Result<()> {
    let details = load_details(INSTALL_EXPERIMENT, INSTALL_EXPERIMENT);
    let report = uninstall_litmus(&details).await;
    print_report(&report);
    if !report.all_succeeded() {
        let failed: Vec<_> = report.failures().map(|s| s.step).collect();
        bail!("uninstall steps failed: {}", failed.join(", "));
    }
    Ok(())
}

fn print_report(report: &UninstallReport) {
    for step in &report.steps {
        match &step.error {
            None => println!("  {} {}", "✓".green(), step.step),
            Some(err) => println!("  {} {}: {}", "✗".red(), step.step, err.dimmed()),
        }
    }
}
