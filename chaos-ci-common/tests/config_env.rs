//! Run configuration read from a real process environment.

#![allow(unsafe_code)]

use std::env;
use std::time::Duration;

use chaos_ci_common::config::ConfigSource;
use chaos_ci_common::{EnvError, ExperimentDetails, StateSet};
use serial_test::serial;

const VARS: &[&str] = &[
    "EXPERIMENT_TIMEOUT",
    "EXPERIMENT_POLLING_INTERVAL",
    "DURATION",
    "DELAY",
    "INFRA_NAME",
    "INSTALL_INFRA",
    "PODS_AFFECTED_PERC",
];

fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    for var in VARS {
        // SAFETY: every test touching the environment is #[serial].
        unsafe { env::remove_var(var) };
    }
    for (key, value) in vars {
        // SAFETY: as above.
        unsafe { env::set_var(key, value) };
    }
    f();
    for (key, _) in vars {
        // SAFETY: as above.
        unsafe { env::remove_var(key) };
    }
}

#[test]
#[serial]
fn test_remote_waits_follow_experiment_timeout() {
    with_env(
        &[("EXPERIMENT_TIMEOUT", "12"), ("EXPERIMENT_POLLING_INTERVAL", "30")],
        || {
            let loaded = ExperimentDetails::from_env("pod-delete", "pod-delete-ci");
            assert!(loaded.errors.is_empty(), "{:?}", loaded.errors);

            let request = loaded
                .details
                .poll
                .request_for("run r1", StateSet::experiment_run());
            assert_eq!(request.timeout, Duration::from_secs(12 * 60));
            assert_eq!(request.poll_interval, Duration::from_secs(30));
        },
    );
}

#[test]
#[serial]
fn test_native_waits_follow_duration_and_delay() {
    with_env(&[("DURATION", "120"), ("DELAY", "2")], || {
        let details = ExperimentDetails::from_env("pod-delete", "pod-delete-ci").details;
        let request = details
            .poll
            .native_request_for("engine e1", StateSet::chaos_engine());
        assert_eq!(request.timeout, Duration::from_secs(120));
        assert_eq!(request.poll_interval, Duration::from_secs(2));
    });
}

#[test]
#[serial]
fn test_infra_defaults_are_derived_from_experiment() {
    with_env(&[], || {
        let loaded = ExperimentDetails::from_env("pod-cpu-hog", "pod-cpu-hog-ci");
        assert_eq!(loaded.details.infra.name, "ci-infra-pod-cpu-hog");
        assert!(loaded.details.infra.install_infra);

        let entry = loaded
            .entries
            .iter()
            .find(|e| e.name == "INFRA_NAME")
            .unwrap();
        assert_eq!(entry.source, ConfigSource::Default.to_string());
    });
}

#[test]
#[serial]
fn test_bad_values_fall_back_and_are_reported() {
    with_env(
        &[("INSTALL_INFRA", "maybe"), ("EXPERIMENT_TIMEOUT", "forever")],
        || {
            let loaded = ExperimentDetails::from_env("pod-delete", "pod-delete-ci");
            assert!(loaded.details.infra.install_infra);
            assert_eq!(loaded.details.poll.experiment_timeout, Duration::from_secs(8 * 60));

            assert_eq!(loaded.errors.len(), 2);
            assert!(loaded
                .errors
                .iter()
                .any(|e| matches!(e, EnvError::InvalidValue { var, .. } if var == "EXPERIMENT_TIMEOUT")));
        },
    );
}
