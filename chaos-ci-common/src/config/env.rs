//! Typed environment variable parsing.
//!
//! Variables are read without a prefix (CI pipelines set `APP_NS`,
//! `TOTAL_CHAOS_DURATION`, ...). An empty variable counts as unset. Invalid
//! values are collected as [`EnvError`]s and the default is used, so every
//! problem can be reported at once.

use std::env;
use std::time::Duration;

use thiserror::Error;

use super::source::Sourced;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },

    #[error("{var} must be set when {because}")]
    Missing { var: String, because: String },
}

/// Error-accumulating reader over the process environment.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

/// Read `name`, treating an empty value as unset.
fn read(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Record an error found by a cross-field check.
    pub fn push_error(&mut self, error: EnvError) {
        self.errors.push(error);
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match read(name) {
            Some(value) => Sourced::from_env(value, name),
            None => Sourced::default_value(default.to_string()),
        }
    }

    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match read(name) {
            Some(value) => Sourced::from_env(Some(value), name),
            None => Sourced::default_value(None),
        }
    }

    /// Accepts 1/true/yes/on and 0/false/no/off, case-insensitively.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let Some(value) = read(name) else {
            return Sourced::default_value(default);
        };
        match parse_bool(&value) {
            Some(parsed) => Sourced::from_env(parsed, name),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var: name.to_string(),
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        self.get_u64_range(name, u64::from(default), u64::from(min), u64::from(max))
            .map(|v| u32::try_from(v).unwrap_or(default))
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let Some(value) = read(name) else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => Sourced::from_env(n, name),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: name.to_string(),
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: name.to_string(),
                    expected: "unsigned integer".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Duration in humantime syntax (`30s`, `5m`). A bare number is read in
    /// `bare_unit`.
    pub fn get_duration(
        &mut self,
        name: &str,
        default: Duration,
        bare_unit: Duration,
    ) -> Sourced<Duration> {
        let Some(value) = read(name) else {
            return Sourced::default_value(default);
        };
        let trimmed = value.trim();
        if let Ok(n) = trimmed.parse::<u32>() {
            return Sourced::from_env(bare_unit * n, name);
        }
        match humantime::parse_duration(trimmed) {
            Ok(parsed) => Sourced::from_env(parsed, name),
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration {
                    var: name.to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let Some(value) = read(name) else {
            return Sourced::default_value(default.to_string());
        };
        let lower = value.trim().to_ascii_lowercase();
        match lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Sourced::from_env(lower, name),
            _ => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: name.to_string(),
                    value,
                });
                Sourced::default_value(default.to_string())
            }
        }
    }

    /// Comma-separated list; blank items are dropped.
    pub fn get_string_list(&mut self, name: &str) -> Sourced<Vec<String>> {
        match read(name) {
            Some(value) => Sourced::from_env(
                value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                name,
            ),
            None => Sourced::default_value(Vec::new()),
        }
    }

    /// Value restricted to `allowed` (case-sensitive).
    pub fn get_choice(&mut self, name: &str, default: &str, allowed: &[&str]) -> Sourced<String> {
        let Some(value) = read(name) else {
            return Sourced::default_value(default.to_string());
        };
        if allowed.contains(&value.as_str()) {
            Sourced::from_env(value, name)
        } else {
            self.errors.push(EnvError::InvalidValue {
                var: name.to_string(),
                expected: format!("one of {}", allowed.join(", ")),
                value,
            });
            Sourced::default_value(default.to_string())
        }
    }
}
