//! Rolling baselines -- the statistical expectation new samples are judged against.

pub mod estimator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use self::estimator::{Estimator, Ewma, Welford};
use crate::config::BaselineConfig;
use crate::error::MonitorError;
use crate::ingest::{Sample, SlotKey};

/// Which incremental update rule a slot's baseline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    Welford,
    Ewma,
}

/// Point-in-time snapshot of a slot's baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub source_key: String,
    pub metric_name: String,
    pub mean: f64,
    pub variance: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
    pub method: BaselineMethod,
}

impl Baseline {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Result of feeding one sample to a [`BaselineEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The model went non-finite and was cleared back to cold.
    Reset,
}

/// Owns the baseline model for one slot.
#[derive(Debug)]
pub struct BaselineEstimator {
    key: SlotKey,
    method: BaselineMethod,
    model: Box<dyn Estimator>,
    min_samples: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl BaselineEstimator {
    pub fn new(key: SlotKey, config: &BaselineConfig) -> Self {
        let model: Box<dyn Estimator> = match config.method {
            BaselineMethod::Welford => Box::new(Welford::new()),
            BaselineMethod::Ewma => Box::new(Ewma::new(config.alpha)),
        };
        Self {
            key,
            method: config.method,
            model,
            min_samples: config.min_samples,
            last_updated: None,
        }
    }

    pub fn update(&mut self, sample: &Sample) -> UpdateOutcome {
        self.model.update(sample.value);
        if !self.model.is_finite() {
            warn!(
                source_key = %self.key.source_key,
                metric_name = %self.key.metric_name,
                value = sample.value,
                "baseline went non-finite, resetting slot baseline"
            );
            self.reset();
            return UpdateOutcome::Reset;
        }
        self.last_updated = Some(match self.last_updated {
            Some(prev) if prev > sample.timestamp => prev,
            _ => sample.timestamp,
        });
        UpdateOutcome::Updated
    }

    pub fn sample_count(&self) -> u64 {
        self.model.count()
    }

    pub fn is_warm(&self) -> bool {
        self.model.count() >= self.min_samples
    }

    /// Current baseline, or `NoBaseline` while fewer than `min_samples` have
    /// been observed.
    pub fn current(&self) -> Result<Baseline, MonitorError> {
        match self.last_updated {
            Some(last_updated) if self.is_warm() => Ok(Baseline {
                source_key: self.key.source_key.clone(),
                metric_name: self.key.metric_name.clone(),
                mean: self.model.mean(),
                variance: self.model.variance(),
                sample_count: self.model.count(),
                last_updated,
                method: self.method,
            }),
            _ => Err(MonitorError::NoBaseline {
                source_key: self.key.source_key.clone(),
                metric_name: self.key.metric_name.clone(),
                needed: self.min_samples,
                have: self.model.count(),
            }),
        }
    }

    pub fn reset(&mut self) {
        self.model.reset();
        self.last_updated = None;
    }
}
