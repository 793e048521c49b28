//! Offline replay of a recorded sample stream through an in-memory engine.
//!
//! Input is JSON Lines, one sample per line:
//! `{"source_key":"svc-a","metric_name":"cpu","value":12.5,"timestamp":"2024-01-01T00:00:00Z"}`

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::alert::{Alert, AlertFilter};
use crate::config::MonitorConfig;
use crate::engine::MonitorEngine;
use crate::ingest::Sample;

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub samples: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub anomalies: usize,
    pub deliveries: u64,
    pub alerts: Vec<Alert>,
}

/// Parse JSON Lines samples. Blank lines are skipped; a malformed line is an
/// error naming its line number.
pub fn read_samples<R: BufRead>(reader: R) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid sample on line {}", idx + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Run `samples` through a fresh engine. Journal persistence is disabled.
pub async fn run(mut config: MonitorConfig, samples: Vec<Sample>) -> Result<ReplayReport> {
    config.storage.path = None;
    let engine = MonitorEngine::new(config)?;

    let total = samples.len();
    let mut accepted = 0;
    let mut anomalies = 0;
    for result in engine.ingest_batch(samples).await {
        match result {
            Ok(outcome) => {
                accepted += 1;
                if outcome.anomaly.is_some() {
                    anomalies += 1;
                }
            }
            Err(e) => warn!(error = %e, "sample rejected during replay"),
        }
    }

    Ok(ReplayReport {
        samples: total,
        accepted,
        rejected: total - accepted,
        anomalies,
        deliveries: engine.stats().await.last_sequence,
        alerts: engine.alerts(&AlertFilter::default()).await,
    })
}

pub async fn run_file(config: MonitorConfig, path: &Path) -> Result<ReplayReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let samples = read_samples(std::io::BufReader::new(file))?;
    run(config, samples).await
}
