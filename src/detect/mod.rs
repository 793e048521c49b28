//! Anomaly detection -- severities, thresholds, and the z-score detector.

pub mod anomaly;
pub mod detector;

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub use anomaly::AnomalyEvent;
pub use detector::Detector;

/// Severity tiers for detected anomalies, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Warning => "warning",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Direction of a deviation. Part of an alert's identity: a spike and a dip
/// on the same metric are tracked as separate alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Observed value above baseline.
    Spike,
    /// Observed value below baseline.
    Dip,
}

impl AnomalyKind {
    pub fn from_z(z: f64) -> Self {
        if z < 0.0 {
            AnomalyKind::Dip
        } else {
            AnomalyKind::Spike
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::Spike => f.write_str("spike"),
            AnomalyKind::Dip => f.write_str("dip"),
        }
    }
}

/// Minimum |z| for each severity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub warning: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 2.0,
            medium: 3.0,
            high: 4.0,
            critical: 5.0,
        }
    }
}

impl Thresholds {
    /// Tiers must be positive, finite, and strictly ascending.
    pub fn validate(&self) -> Result<()> {
        let tiers = [self.warning, self.medium, self.high, self.critical];
        if tiers.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            bail!("detector thresholds must be positive finite numbers: {:?}", self);
        }
        if tiers.windows(2).any(|w| w[0] >= w[1]) {
            bail!(
                "detector thresholds must be strictly ascending (warning < medium < high < critical): {:?}",
                self
            );
        }
        Ok(())
    }

    /// Tiers from most to least severe.
    pub(crate) fn tiers(&self) -> [(Severity, f64); 4] {
        [
            (Severity::Critical, self.critical),
            (Severity::High, self.high),
            (Severity::Medium, self.medium),
            (Severity::Warning, self.warning),
        ]
    }
}
