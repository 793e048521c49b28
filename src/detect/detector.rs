use uuid::Uuid;

use super::{AnomalyEvent, AnomalyKind, Severity, Thresholds};
use crate::baseline::Baseline;
use crate::config::DetectorConfig;
use crate::ingest::Sample;

/// Slack applied when comparing |z| against a tier, so that a value sitting
/// exactly on a boundary still lands in the higher tier after epsilon is
/// added to the variance.
const BOUNDARY_TOLERANCE: f64 = 1e-6;

/// Stateless z-score detector.
#[derive(Debug, Clone)]
pub struct Detector {
    thresholds: Thresholds,
    epsilon: f64,
}

impl Detector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            epsilon: config.epsilon,
        }
    }

    /// z = (value - mean) / sqrt(variance + epsilon)
    pub fn z_score(&self, sample: &Sample, baseline: &Baseline) -> f64 {
        (sample.value - baseline.mean) / (baseline.variance + self.epsilon).sqrt()
    }

    /// Severity tier for a z-score, or `None` below the warning threshold.
    pub fn classify(&self, z: f64) -> Option<Severity> {
        let magnitude = z.abs();
        self.thresholds
            .tiers()
            .into_iter()
            .find(|(_, threshold)| magnitude >= threshold - BOUNDARY_TOLERANCE)
            .map(|(severity, _)| severity)
    }

    /// A calm sample is one that would not raise even a warning.
    pub fn is_calm(&self, z: f64) -> bool {
        self.classify(z).is_none()
    }

    /// Compare a sample with its baseline and emit an event if it deviates.
    pub fn check(&self, sample: &Sample, baseline: &Baseline) -> Option<AnomalyEvent> {
        let z = self.z_score(sample, baseline);
        let severity = self.classify(z)?;
        Some(AnomalyEvent {
            id: Uuid::new_v4(),
            source_key: sample.source_key.clone(),
            metric_name: sample.metric_name.clone(),
            kind: AnomalyKind::from_z(z),
            severity,
            observed_value: sample.value,
            z_score: z,
            baseline_at_detection: baseline.clone(),
            detected_at: sample.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineMethod;
    use chrono::{TimeZone, Utc};

    fn baseline(mean: f64, variance: f64) -> Baseline {
        Baseline {
            source_key: "svc-a".into(),
            metric_name: "cpu".into(),
            mean,
            variance,
            sample_count: 10,
            last_updated: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            method: BaselineMethod::Welford,
        }
    }

    fn sample(value: f64) -> Sample {
        Sample::new("svc-a", "cpu", value, Utc.timestamp_opt(1_700_000_010, 0).unwrap())
    }

    fn detector() -> Detector {
        Detector::new(&DetectorConfig::default())
    }

    #[test]
    fn test_z_five_is_critical() {
        let event = detector().check(&sample(15.0), &baseline(10.0, 1.0)).unwrap();
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.kind, AnomalyKind::Spike);
        assert!((event.z_score - 5.0).abs() < 1e-6);
        assert_eq!(event.observed_value, 15.0);
        assert_eq!(event.baseline_at_detection.mean, 10.0);
    }

    #[test]
    fn test_boundaries_round_up() {
        let d = detector();
        let b = baseline(10.0, 1.0);
        assert_eq!(d.check(&sample(12.0), &b).unwrap().severity, Severity::Warning);
        assert_eq!(d.check(&sample(13.0), &b).unwrap().severity, Severity::Medium);
        assert_eq!(d.check(&sample(14.0), &b).unwrap().severity, Severity::High);
        assert_eq!(d.check(&sample(6.0), &b).unwrap().severity, Severity::High);
    }

    #[test]
    fn test_below_warning_is_none() {
        let d = detector();
        assert!(d.check(&sample(11.9), &baseline(10.0, 1.0)).is_none());
        assert!(d.is_calm(1.99));
        assert!(!d.is_calm(-2.0));
    }

    #[test]
    fn test_dip_detected() {
        let event = detector().check(&sample(7.0), &baseline(10.0, 1.0)).unwrap();
        assert_eq!(event.kind, AnomalyKind::Dip);
        assert_eq!(event.severity, Severity::Medium);
        assert!(event.z_score < 0.0);
    }

    #[test]
    fn test_zero_variance_baseline_flags_any_deviation() {
        let d = detector();
        let b = baseline(10.0, 0.0);
        assert!(d.check(&sample(10.0), &b).is_none());
        assert_eq!(d.check(&sample(10.01), &b).unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_check_is_idempotent() {
        let d = detector();
        let s = sample(13.7);
        let b = baseline(10.0, 2.5);
        let first = d.check(&s, &b).unwrap();
        let second = d.check(&s, &b).unwrap();
        assert_eq!(first.severity, second.severity);
        assert_eq!(first.z_score, second.z_score);
        assert_eq!(first.detected_at, second.detected_at);
    }

    #[test]
    fn test_custom_thresholds() {
        let d = Detector::new(&DetectorConfig {
            epsilon: 1e-9,
            thresholds: Thresholds {
                warning: 1.0,
                medium: 1.5,
                high: 2.5,
                critical: 10.0,
            },
        });
        assert_eq!(d.classify(1.2), Some(Severity::Warning));
        assert_eq!(d.classify(9.0), Some(Severity::High));
        assert_eq!(d.classify(0.5), None);
    }
}
