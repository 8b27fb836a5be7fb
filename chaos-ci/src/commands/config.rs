//! `config`: the resolved configuration and where each value came from.

use anyhow::{Result, bail};
use chaos_ci_common::config::ConfigEntry;
use chaos_ci_common::ExperimentDetails;
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct Report<'a> {
    experiment: &'a str,
    entries: &'a [ConfigEntry],
    errors: Vec<String>,
}

pub fn show(experiment: &str, json: bool, strict: bool) -> Result<()> {
    let loaded = ExperimentDetails::from_env(experiment, experiment);
    let errors: Vec<String> = loaded.errors.iter().map(ToString::to_string).collect();

    if json {
        let report = Report {
            experiment,
            entries: &loaded.entries,
            errors: errors.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_table(&loaded.entries));
        for err in &errors {
            eprintln!("{} {}", "warning:".yellow().bold(), err);
        }
    }

    if strict && !errors.is_empty() {
        bail!("{} invalid configuration value(s)", errors.len());
    }
    Ok(())
}

fn render_table(entries: &[ConfigEntry]) -> String {
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        let value = if entry.value.is_empty() {
            "(unset)".dimmed().to_string()
        } else {
            entry.value.clone()
        };
        out.push_str(&format!(
            "{:<width$}  {}  {}\n",
            entry.name,
            value,
            format!("[{}]", entry.source).dimmed()
        ));
    }
    out
}
