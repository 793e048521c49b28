//! Alerts and their lifecycle.

pub mod lifecycle;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::{AnomalyEvent, AnomalyKind, Severity};
use crate::ingest::SlotKey;

pub use lifecycle::{AlertLifecycle, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertState {
    pub fn is_active(self) -> bool {
        matches!(self, AlertState::Open | AlertState::Acknowledged)
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertState::Open => "open",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

/// An operator-facing alert, one per anomaly episode on a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    /// Latest detection for this episode.
    pub anomaly: AnomalyEvent,
    /// Highest severity reported so far.
    pub severity: Severity,
    pub state: AlertState,
    pub opened_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Detections folded into this alert, including the opening one.
    pub detections: u32,
    /// Bumped on every mutation; lets stored copies tell old from new.
    pub revision: u64,
}

impl Alert {
    pub fn open(anomaly: AnomalyEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity: anomaly.severity,
            state: AlertState::Open,
            opened_at: anomaly.detected_at,
            acknowledged_at: None,
            resolved_at: None,
            detections: 1,
            revision: 1,
            anomaly,
        }
    }

    pub fn source_key(&self) -> &str {
        &self.anomaly.source_key
    }

    pub fn metric_name(&self) -> &str {
        &self.anomaly.metric_name
    }

    pub fn kind(&self) -> AnomalyKind {
        self.anomaly.kind
    }

    pub fn key(&self) -> SlotKey {
        self.anomaly.key()
    }
}

/// Selects alerts by any combination of fields. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub state: Option<AlertState>,
    pub source_key: Option<String>,
    pub metric_name: Option<String>,
    pub kind: Option<AnomalyKind>,
    pub min_severity: Option<Severity>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.state.map_or(true, |s| alert.state == s)
            && self
                .source_key
                .as_deref()
                .map_or(true, |k| alert.source_key() == k)
            && self
                .metric_name
                .as_deref()
                .map_or(true, |m| alert.metric_name() == m)
            && self.kind.map_or(true, |k| alert.kind() == k)
            && self.min_severity.map_or(true, |s| alert.severity >= s)
    }
}
