//! Bounded rolling window of samples for a single slot.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use super::Sample;
use crate::error::MonitorError;

/// How much history a [`SampleBuffer`] retains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowPolicy {
    /// The `capacity` most recent samples.
    Count { capacity: usize },
    /// Samples newer than `newest - span`, never more than `max_samples`.
    Span { span: Duration, max_samples: usize },
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Count { capacity: 100 }
    }
}

/// Ring buffer of samples ordered by timestamp, oldest first.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    policy: WindowPolicy,
    samples: VecDeque<Sample>,
}

impl SampleBuffer {
    pub fn new(policy: WindowPolicy) -> Self {
        let reserve = match policy {
            WindowPolicy::Count { capacity } => capacity,
            WindowPolicy::Span { max_samples, .. } => max_samples.min(1024),
        };
        Self {
            policy,
            samples: VecDeque::with_capacity(reserve),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The oldest timestamp a new sample may carry.
    ///
    /// In count mode there is no floor until the buffer is full. In span mode
    /// the floor is `newest - span`, raised to the oldest retained sample
    /// once the hard cap is reached.
    pub fn floor(&self) -> Option<DateTime<Utc>> {
        match self.policy {
            WindowPolicy::Count { capacity } => {
                if self.samples.len() >= capacity {
                    self.samples.front().map(|s| s.timestamp)
                } else {
                    None
                }
            }
            WindowPolicy::Span { span, max_samples } => {
                let by_age = self.samples.back().map(|s| s.timestamp - span)?;
                match self.samples.front() {
                    Some(oldest) if self.samples.len() >= max_samples => {
                        Some(by_age.max(oldest.timestamp))
                    }
                    _ => Some(by_age),
                }
            }
        }
    }

    /// Insert a sample at its timestamp position, evicting whatever falls out
    /// of the window. Fails without modifying the buffer if the sample is
    /// older than the current floor.
    pub fn push(&mut self, sample: Sample) -> Result<(), MonitorError> {
        if let Some(floor) = self.floor() {
            if sample.timestamp < floor {
                return Err(MonitorError::StaleSample {
                    source_key: sample.source_key,
                    metric_name: sample.metric_name,
                    timestamp: sample.timestamp,
                    floor,
                });
            }
        }

        // Equal timestamps keep arrival order.
        let pos = self
            .samples
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.samples.insert(pos, sample);
        self.evict();
        Ok(())
    }

    fn evict(&mut self) {
        match self.policy {
            WindowPolicy::Count { capacity } => {
                while self.samples.len() > capacity {
                    self.samples.pop_front();
                }
            }
            WindowPolicy::Span { span, max_samples } => {
                if let Some(newest) = self.samples.back().map(|s| s.timestamp) {
                    let floor = newest - span;
                    while self.samples.front().is_some_and(|s| s.timestamp < floor) {
                        self.samples.pop_front();
                    }
                }
                while self.samples.len() > max_samples {
                    self.samples.pop_front();
                }
            }
        }
    }

    /// Retained samples, oldest first. Each call starts a fresh pass.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
