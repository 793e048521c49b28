//! Domain error taxonomy for the monitoring engine.
//!
//! Every variant is recoverable: nothing here is fatal to the process. Errors
//! scoped to a slot carry the offending `(source_key, metric_name)` pair.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::alert::AlertState;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MonitorError {
    #[error("stale sample for {source_key}/{metric_name}: {timestamp} is older than window floor {floor}")]
    StaleSample {
        source_key: String,
        metric_name: String,
        timestamp: DateTime<Utc>,
        floor: DateTime<Utc>,
    },

    #[error("invalid sample for {source_key}/{metric_name}: {reason}")]
    InvalidSample {
        source_key: String,
        metric_name: String,
        reason: String,
    },

    #[error("no baseline for {source_key}/{metric_name}: need {needed} samples, have {have}")]
    NoBaseline {
        source_key: String,
        metric_name: String,
        needed: u64,
        have: u64,
    },

    #[error("unknown slot {source_key}/{metric_name}")]
    UnknownSlot {
        source_key: String,
        metric_name: String,
    },

    #[error("alert {id} not found")]
    AlertNotFound { id: Uuid },

    #[error("cannot {action} alert {id} ({source_key}/{metric_name}) in state {from}")]
    InvalidStateTransition {
        id: Uuid,
        source_key: String,
        metric_name: String,
        from: AlertState,
        action: &'static str,
    },

    #[error("subscription {id} not found")]
    SubscriptionNotFound { id: Uuid },

    #[error("delivery acknowledgment for subscription {subscription} timed out after {timeout_ms}ms")]
    DeliveryTimeout { subscription: Uuid, timeout_ms: u64 },
}

impl MonitorError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MonitorError::StaleSample { .. } => "stale_sample",
            MonitorError::InvalidSample { .. } => "invalid_sample",
            MonitorError::NoBaseline { .. } => "no_baseline",
            MonitorError::UnknownSlot { .. } => "unknown_slot",
            MonitorError::AlertNotFound { .. } => "alert_not_found",
            MonitorError::InvalidStateTransition { .. } => "invalid_state_transition",
            MonitorError::SubscriptionNotFound { .. } => "subscription_not_found",
            MonitorError::DeliveryTimeout { .. } => "delivery_timeout",
        }
    }

    /// The slot this error concerns, when it has one.
    pub fn slot(&self) -> Option<(&str, &str)> {
        match self {
            MonitorError::StaleSample {
                source_key,
                metric_name,
                ..
            }
            | MonitorError::InvalidSample {
                source_key,
                metric_name,
                ..
            }
            | MonitorError::NoBaseline {
                source_key,
                metric_name,
                ..
            }
            | MonitorError::UnknownSlot {
                source_key,
                metric_name,
            }
            | MonitorError::InvalidStateTransition {
                source_key,
                metric_name,
                ..
            } => Some((source_key.as_str(), metric_name.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_scoped_errors_carry_key() {
        let err = MonitorError::NoBaseline {
            source_key: "svc-a".into(),
            metric_name: "cpu".into(),
            needed: 10,
            have: 9,
        };
        assert_eq!(err.slot(), Some(("svc-a", "cpu")));
        assert_eq!(err.code(), "no_baseline");
        assert!(err.to_string().contains("svc-a/cpu"));
    }

    #[test]
    fn test_id_scoped_errors_have_no_slot() {
        let err = MonitorError::AlertNotFound { id: Uuid::nil() };
        assert_eq!(err.slot(), None);
    }
}
