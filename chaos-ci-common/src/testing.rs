//! Helpers for tests of code built on the poller.
//!
//! # Test logging
//!
//! ```ignore
//! use chaos_ci_common::testing::init_test_logging;
//!
//! #[ctor::ctor]
//! fn setup() {
//!     init_test_logging();
//! }
//! ```
//!
//! `CCI_TEST_LOG_LEVEL` sets the level (default `info`).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::status::{FetchError, StatusSource};

static TEST_LOGGING_INIT: Once = Once::new();

/// Install a compact subscriber that writes through the test harness.
/// Safe to call from every test.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let level = std::env::var("CCI_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = EnvFilter::try_new(format!("chaos_ci={level},chaos_ci_common={level}"))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

/// A status source that replays a fixed script of reads.
///
/// Once the script runs out every read returns the fallback label
/// (`Running` unless changed).
#[derive(Debug)]
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Result<String, FetchError>>>,
    fallback: String,
    fetches: AtomicU32,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: "Running".to_string(),
            fetches: AtomicU32::new(0),
        }
    }

    pub fn then_state(self, state: &str) -> Self {
        self.push(Ok(state.to_string()))
    }

    pub fn then_error(self, err: FetchError) -> Self {
        self.push(Err(err))
    }

    /// `n` reads that find nothing yet.
    pub fn then_not_visible(mut self, n: usize) -> Self {
        let resource = self.name.clone();
        for _ in 0..n {
            self = self.then_error(FetchError::not_yet_visible(resource.clone()));
        }
        self
    }

    pub fn otherwise(mut self, state: &str) -> Self {
        self.fallback = state.to_string();
        self
    }

    fn push(self, step: Result<String, FetchError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(step);
        self
    }

    /// Reads performed so far.
    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl StatusSource for ScriptedSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn fetch_state(&self) -> Result<String, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let source = ScriptedSource::new("engine e1")
            .then_not_visible(1)
            .then_state("Completed")
            .otherwise("Stopped");

        assert!(source.fetch_state().await.unwrap_err().is_not_yet_visible());
        assert_eq!(source.fetch_state().await.unwrap(), "Completed");
        assert_eq!(source.fetch_state().await.unwrap(), "Stopped");
        assert_eq!(source.fetches(), 3);
        assert_eq!(source.describe(), "engine e1");
    }
}
