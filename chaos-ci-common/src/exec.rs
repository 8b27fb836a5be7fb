//! `kubectl` and `helm` invocations.
//!
//! Anything the typed Kubernetes client does not cover (applying remote
//! manifests, Helm releases) goes through these wrappers. Output is captured,
//! never streamed.

use std::ffi::OsStr;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code}: {stderr}")]
    NonZero {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process was killed by a signal.
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

fn render<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Run `program` to completion and return its output, whatever the exit code.
pub async fn capture<I, S>(program: &str, args: I) -> Result<CommandOutput, ExecError>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    let command = render(program, args.clone());
    debug!(%command, "Running command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

    Ok(CommandOutput {
        command,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        code: output.status.code().unwrap_or(-1),
    })
}

/// Run `program` and fail unless it exits with status 0.
pub async fn run<I, S>(program: &str, args: I) -> Result<CommandOutput, ExecError>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    let output = capture(program, args).await?;
    if !output.success() {
        warn!(command = %output.command, code = output.code, stderr = %output.stderr, "Command failed");
        return Err(ExecError::NonZero {
            command: output.command,
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

pub async fn kubectl<I, S>(args: I) -> Result<CommandOutput, ExecError>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    run("kubectl", args).await
}

pub async fn helm<I, S>(args: I) -> Result<CommandOutput, ExecError>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    run("helm", args).await
}
