//! Where a configuration value came from.

use std::fmt;

/// Origin of a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from an environment variable.
    Environment,
    /// Built-in default.
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "env"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// A value together with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable the value was read from, when it came from the environment.
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn from_env(value: T, env_var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(env_var.into()),
        }
    }

    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            env_var: None,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
        }
    }

    pub fn is_default(&self) -> bool {
        self.source == ConfigSource::Default
    }
}

/// One line of the resolved-configuration report.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConfigEntry {
    pub name: String,
    pub value: String,
    pub source: String,
}

impl ConfigEntry {
    pub fn new<T: fmt::Display>(name: &str, sourced: &Sourced<T>) -> Self {
        Self {
            name: name.to_string(),
            value: sourced.value.to_string(),
            source: sourced.source.to_string(),
        }
    }

    /// Entry whose value is replaced by a mask when set.
    pub fn masked(name: &str, sourced: &Sourced<String>) -> Self {
        let value = if sourced.value.is_empty() {
            String::new()
        } else {
            "********".to_string()
        };
        Self {
            name: name.to_string(),
            value,
            source: sourced.source.to_string(),
        }
    }
}
