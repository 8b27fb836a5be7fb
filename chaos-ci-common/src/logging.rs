//! Process-wide tracing setup for the `chaos-ci` binary.
//!
//! `RUST_LOG` wins over `LOG_LEVEL`. `LOG_FORMAT=json` switches stderr to
//! JSON lines. `LOG_FILE` adds a non-blocking JSON file layer whose writer
//! guard lives in [`LoggingGuards`]. Invalid values fall back to defaults and
//! are reported as warnings once the subscriber is up.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{EnvError, EnvParser};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// Full filter directive from `RUST_LOG`, used verbatim when set.
    pub directive: Option<String>,
    pub format: LogFormat,
    pub stderr: bool,
    pub file: Option<PathBuf>,
    /// Variables that could not be used.
    pub env_errors: Vec<EnvError>,
}

impl LogConfig {
    /// Read `LOG_LEVEL`, `RUST_LOG`, `LOG_FORMAT` and `LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let directive = parser.get_optional_string("RUST_LOG").value;
        let format = match parser
            .get_choice("LOG_FORMAT", "pretty", &["pretty", "json"])
            .value
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let file = parser.get_optional_string("LOG_FILE").value.map(|raw| {
            PathBuf::from(shellexpand::tilde(&raw).into_owned())
        });

        Self {
            level,
            directive,
            format,
            stderr: false,
            file,
            env_errors: parser.take_errors(),
        }
    }

    /// Override the level. Clears any `RUST_LOG` directive.
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self.directive = None;
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Filter directive handed to `EnvFilter`.
    pub fn filter_directive(&self) -> String {
        match &self.directive {
            Some(directive) => directive.clone(),
            None => format!(
                "warn,chaos_ci={level},chaos_ci_common={level}",
                level = self.level
            ),
        }
    }
}

/// Keeps background log writers alive. Drop it last.
#[derive(Default)]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let directive = config.filter_directive();
    let filter = EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
        filter: directive.clone(),
        message: e.to_string(),
    })?;

    let stderr_layer = config.stderr.then(|| match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
    });

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    for err in &config.env_errors {
        tracing::warn!(error = %err, "Ignoring logging setting");
    }

    Ok(LoggingGuards { _file: file_guard })
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;
    use std::env;

    const TOUCHED: &[&str] = &["LOG_LEVEL", "RUST_LOG", "LOG_FORMAT", "LOG_FILE"];

    fn with_env(vars: &[(&str, &str)]) -> LogConfig {
        let _guard = env_test_lock();
        for var in TOUCHED {
            // SAFETY: env access is serialised by env_test_lock.
            unsafe { env::remove_var(var) };
        }
        for (key, value) in vars {
            // SAFETY: as above.
            unsafe { env::set_var(key, value) };
        }
        let config = LogConfig::from_env("info");
        for (key, _) in vars {
            // SAFETY: as above.
            unsafe { env::remove_var(key) };
        }
        config
    }

    fn base() -> LogConfig {
        LogConfig {
            level: "info".to_string(),
            directive: None,
            format: LogFormat::Pretty,
            stderr: false,
            file: None,
            env_errors: Vec::new(),
        }
    }

    #[test]
    fn test_filter_directive_scopes_crates() {
        let cfg = base().with_level("debug");
        assert_eq!(
            cfg.filter_directive(),
            "warn,chaos_ci=debug,chaos_ci_common=debug"
        );
    }

    #[test]
    fn test_rust_log_directive_wins_until_level_override() {
        let mut cfg = base();
        cfg.directive = Some("kube=debug".to_string());
        assert_eq!(cfg.filter_directive(), "kube=debug");
        assert!(cfg.with_level("trace").filter_directive().contains("chaos_ci=trace"));
    }

    #[test]
    fn test_builders() {
        let cfg = base().with_stderr().with_json().with_file("/tmp/chaos.log");
        assert!(cfg.stderr);
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.file.as_deref(), Some(Path::new("/tmp/chaos.log")));
    }

    #[test]
    fn test_invalid_settings_are_kept_for_reporting() {
        let cfg = with_env(&[("LOG_LEVEL", "loud"), ("LOG_FORMAT", "xml")]);
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert_eq!(cfg.env_errors.len(), 2);
        assert!(matches!(
            &cfg.env_errors[0],
            EnvError::InvalidLogLevel { var, value } if var == "LOG_LEVEL" && value == "loud"
        ));
    }

    #[test]
    fn test_valid_settings_report_nothing() {
        let cfg = with_env(&[("LOG_LEVEL", "DEBUG"), ("LOG_FORMAT", "json")]);
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.env_errors.is_empty());
    }
}
