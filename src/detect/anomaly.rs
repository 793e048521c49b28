use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AnomalyKind, Severity};
use crate::baseline::Baseline;
use crate::ingest::SlotKey;

/// A single detection: one sample that deviated from its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub source_key: String,
    pub metric_name: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub observed_value: f64,
    pub z_score: f64,
    pub baseline_at_detection: Baseline,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyEvent {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.source_key.clone(), self.metric_name.clone())
    }

    pub fn describe(&self) -> String {
        format!(
            "{} {} on {}/{}: {:.3} (baseline {:.3} +/- {:.3}, z = {:.2})",
            self.severity,
            self.kind,
            self.source_key,
            self.metric_name,
            self.observed_value,
            self.baseline_at_detection.mean,
            self.baseline_at_detection.std_dev(),
            self.z_score
        )
    }
}
