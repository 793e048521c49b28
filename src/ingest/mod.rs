//! Sample ingestion -- sample types, slot keys, and the rolling window buffer.

pub mod buffer;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use buffer::{SampleBuffer, WindowPolicy};

/// Identifies a slot: the unit of state and locking for one metric of one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub source_key: String,
    pub metric_name: String,
}

impl SlotKey {
    pub fn new(source_key: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_key, self.metric_name)
    }
}

/// A single timestamped metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub source_key: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        source_key: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            metric_name: metric_name.into(),
            value,
            timestamp,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.source_key.clone(), self.metric_name.clone())
    }
}
