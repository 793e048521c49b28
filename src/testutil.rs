//! Fixtures shared by unit tests.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::alert::{Alert, AlertState};
use crate::baseline::{Baseline, BaselineMethod};
use crate::detect::{AnomalyEvent, AnomalyKind, Severity};
use crate::ingest::Sample;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn sample(source_key: &str, metric_name: &str, value: f64, secs: i64) -> Sample {
    Sample::new(source_key, metric_name, value, at(secs))
}

pub fn alert(source_key: &str, metric_name: &str, severity: Severity) -> Alert {
    Alert::open(AnomalyEvent {
        id: Uuid::new_v4(),
        source_key: source_key.into(),
        metric_name: metric_name.into(),
        kind: AnomalyKind::Spike,
        severity,
        observed_value: 15.0,
        z_score: 5.0,
        baseline_at_detection: Baseline {
            source_key: source_key.into(),
            metric_name: metric_name.into(),
            mean: 10.0,
            variance: 1.0,
            sample_count: 10,
            last_updated: at(0),
            method: BaselineMethod::Welford,
        },
        detected_at: at(1),
    })
}

pub fn resolved(mut alert: Alert) -> Alert {
    alert.state = AlertState::Resolved;
    alert.resolved_at = Some(at(2));
    alert.revision += 1;
    alert
}
