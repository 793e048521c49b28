//! One slot: the buffer, baseline, and alert state for a single
//! (source_key, metric_name) pair. Always accessed under its own lock.

use crate::alert::{AlertLifecycle, Transition};
use crate::baseline::{BaselineEstimator, UpdateOutcome};
use crate::config::MonitorConfig;
use crate::detect::{AnomalyEvent, Detector};
use crate::error::MonitorError;
use crate::ingest::{Sample, SampleBuffer, SlotKey, WindowPolicy};

#[derive(Debug)]
pub struct Slot {
    pub buffer: SampleBuffer,
    pub estimator: BaselineEstimator,
    pub alerts: AlertLifecycle,
}

/// What a single sample did to its slot.
#[derive(Debug, Default)]
pub struct Observation {
    /// Deviation from the pre-sample baseline; `None` while cold.
    pub z_score: Option<f64>,
    pub anomaly: Option<AnomalyEvent>,
    pub transitions: Vec<Transition>,
    pub baseline_reset: bool,
}

impl Slot {
    pub fn new(key: SlotKey, config: &MonitorConfig, window: WindowPolicy) -> Self {
        Self {
            buffer: SampleBuffer::new(window),
            estimator: BaselineEstimator::new(key.clone(), &config.baseline),
            alerts: AlertLifecycle::new(key, &config.lifecycle),
        }
    }

    /// Run a sample through buffer, detector, lifecycle, and baseline, in
    /// that order. The sample is judged against the baseline as it stood
    /// before the sample arrived.
    pub fn observe(&mut self, sample: Sample, detector: &Detector) -> Result<Observation, MonitorError> {
        self.buffer.push(sample.clone())?;

        let mut obs = Observation::default();
        if let Ok(baseline) = self.estimator.current() {
            obs.z_score = Some(detector.z_score(&sample, &baseline));
            match detector.check(&sample, &baseline) {
                Some(event) => {
                    obs.anomaly = Some(event.clone());
                    obs.transitions.push(self.alerts.on_anomaly(event));
                }
                None => obs.transitions.extend(self.alerts.on_calm(sample.timestamp)),
            }
        }

        obs.baseline_reset = self.estimator.update(&sample) == UpdateOutcome::Reset;
        Ok(obs)
    }

    /// Drop buffered samples and the baseline. Active alerts are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.estimator.reset();
    }
}
