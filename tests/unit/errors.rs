//! Unit tests for error classification and configuration loading

use std::time::Duration;

use replica_provider::client::ApiError;
use replica_provider::controller::{BackoffConfig, ErrorContext, ReconcilerConfig};
use replica_provider::{Error, ReplacementStage};

mod classification_tests {
    use super::*;

    #[test]
    fn test_rejected_keeps_status() {
        let err = Error::from(ApiError::Rejected {
            status: 422,
            message: "invalid size".to_string(),
        });
        match err {
            Error::RemoteRejected(msg) => assert!(msg.contains("422")),
            other => panic!("expected RemoteRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::TransientError("reset".into()).is_retryable());
        assert!(
            Error::Timeout {
                id: "C1/read-01".into(),
                waited: Duration::from_secs(60),
                last_status: "creating".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_permanent_errors() {
        for err in [
            Error::ValidationError("bad".into()),
            Error::RemoteRejected("422".into()),
            Error::RemoteFailed("failed".into()),
            Error::NotFound("gone".into()),
            Error::Cancelled("stop".into()),
        ] {
            assert!(!err.is_retryable(), "{} should not be retryable", err);
        }
    }

    #[test]
    fn test_replacement_failure_names_stage_and_cause() {
        let err = Error::ReplacementFailed {
            id: "C1/read-01".into(),
            stage: ReplacementStage::Delete,
            source: Box::new(Error::RemoteRejected("locked".into())),
        };
        let message = err.to_string();
        assert!(message.contains("during delete"));
        assert!(message.contains("locked"));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "replacement_failed");
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            id: "C1/read-01".into(),
            waited: Duration::from_secs(30),
            last_status: "resizing".into(),
        };
        let message = err.to_string();
        assert!(message.contains("C1/read-01"));
        assert!(message.contains("resizing"));
    }
}

mod backoff_tests {
    use super::*;

    #[test]
    fn test_delay_grows_with_attempts() {
        let backoff = BackoffConfig {
            jitter: 0.0,
            ..Default::default()
        };
        let err = Error::TransientError("503".into());
        assert_eq!(
            backoff.delay_for_error(&err, 2),
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = BackoffConfig::default();
        for _ in 0..100 {
            let delay = backoff.delay_for_attempt(0).as_secs_f64();
            assert!((4.5..=5.5).contains(&delay));
        }
    }

    #[test]
    fn test_error_context_records_last_error() {
        let mut ctx = ErrorContext::default();
        ctx.record_error(&Error::TransientError("first".into()));
        ctx.record_error(&Error::TransientError("second".into()));
        assert_eq!(ctx.consecutive_errors, 2);
        assert!(ctx.last_error.unwrap().contains("second"));
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.timeouts.create, Duration::from_secs(30 * 60));
        assert_eq!(config.timeouts.delete, Duration::from_secs(10 * 60));
    }

    #[test]
    fn test_overrides() {
        let config = ReconcilerConfig::from_lookup(|key: &str| match key {
            "REPLICA_POLL_INTERVAL_SECS" => Some("2".to_string()),
            "REPLICA_UPDATE_TIMEOUT_SECS" => Some("120".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.timeouts.update, Duration::from_secs(120));
        assert_eq!(config.timeouts.create, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let err = ReconcilerConfig::from_lookup(|key: &str| {
            (key == "REPLICA_MAX_TRANSIENT_ERRORS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
