//! The monitor engine: slot table, alert index, delivery queue, and journal.
//!
//! Each slot sits behind its own mutex so unrelated sources never contend.
//! The slot map and alert index are only locked long enough to look up or
//! insert an entry. Lock order is slot, then index: ingest updates the index
//! while still holding the slot, and nothing locks a slot while holding the
//! index.

pub mod slot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::slot::Slot;
use crate::alert::{Alert, AlertFilter, Transition};
use crate::baseline::Baseline;
use crate::config::MonitorConfig;
use crate::delivery::{DeliveryBatch, DeliveryItem, DeliveryQueue, Subscription};
use crate::detect::{AnomalyEvent, Detector};
use crate::error::MonitorError;
use crate::ingest::{Sample, SlotKey, WindowPolicy};
use crate::storage::Journal;

/// An alert state change caused by one sample.
#[derive(Debug, Clone, Serialize)]
pub struct AlertChange {
    pub transition: &'static str,
    pub alert: Alert,
    /// Delivery sequence number, for transitions that are delivered.
    pub sequence: Option<u64>,
}

/// Everything one accepted sample produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub source_key: String,
    pub metric_name: String,
    pub z_score: Option<f64>,
    pub anomaly: Option<AnomalyEvent>,
    pub changes: Vec<AlertChange>,
    pub baseline_reset: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub slots: usize,
    pub active_alerts: usize,
    pub subscriptions: usize,
    pub last_sequence: u64,
    pub started_at: DateTime<Utc>,
}

pub struct MonitorEngine {
    config: MonitorConfig,
    window: WindowPolicy,
    detector: Detector,
    slots: RwLock<HashMap<SlotKey, Arc<Mutex<Slot>>>>,
    alert_index: RwLock<HashMap<Uuid, SlotKey>>,
    queue: DeliveryQueue,
    journal: Option<Journal>,
    started_at: DateTime<Utc>,
}

impl MonitorEngine {
    /// Build an in-memory engine. Fails only on invalid configuration.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let window = config.window.policy()?;
        Ok(Self {
            detector: Detector::new(&config.detector),
            queue: DeliveryQueue::new(config.delivery.clone()),
            window,
            slots: RwLock::new(HashMap::new()),
            alert_index: RwLock::new(HashMap::new()),
            journal: None,
            started_at: Utc::now(),
            config,
        })
    }

    /// Build an engine, attaching and replaying the journal when
    /// `storage.path` is configured.
    pub async fn open(config: MonitorConfig) -> Result<Self> {
        let path = config.storage.path.clone();
        let mut engine = Self::new(config)?;
        if let Some(path) = path {
            let journal = Journal::open(&path, engine.config.delivery.log_capacity)?;
            engine.restore(&journal).await?;
            engine.journal = Some(journal);
        }
        Ok(engine)
    }

    async fn restore(&self, journal: &Journal) -> Result<()> {
        let j = journal.clone();
        let alerts = tokio::task::spawn_blocking(move || j.load_alerts())
            .await
            .context("journal alert load panicked")??;
        let j = journal.clone();
        let limit = self.config.delivery.log_capacity;
        let (items, watermark) = tokio::task::spawn_blocking(move || j.load_deliveries(limit))
            .await
            .context("journal delivery load panicked")??;

        let restored = alerts.len();
        for alert in alerts {
            let key = alert.key();
            let id = alert.id;
            let slot = self.slot_or_insert(&key).await;
            let evicted = {
                let mut slot = slot.lock().await;
                slot.alerts.restore(alert);
                slot.alerts.take_evicted()
            };
            let mut index = self.alert_index.write().await;
            index.insert(id, key);
            for old in evicted {
                index.remove(&old);
            }
        }
        self.queue.restore(items, watermark).await;
        info!(alerts = restored, watermark, "engine state restored from journal");
        Ok(())
    }

    async fn slot(&self, key: &SlotKey) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().await.get(key).cloned()
    }

    async fn slot_or_insert(&self, key: &SlotKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slot(key).await {
            return slot;
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(slot = %key, "slot created");
                Arc::new(Mutex::new(Slot::new(key.clone(), &self.config, self.window)))
            })
            .clone()
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Feed one sample through its slot's pipeline.
    pub async fn ingest(&self, sample: Sample) -> Result<IngestOutcome, MonitorError> {
        validate(&sample)?;
        let key = sample.key();
        let slot = self.slot_or_insert(&key).await;

        let mut changes = Vec::new();
        let mut delivered: Vec<DeliveryItem> = Vec::new();
        let (obs, evicted) = {
            let mut slot = slot.lock().await;
            let obs = match slot.observe(sample, &self.detector) {
                Ok(obs) => obs,
                Err(e) => {
                    warn!(slot = %key, error = %e, "sample rejected");
                    return Err(e);
                }
            };
            // Enqueue while the slot is held so a slot's deliveries keep
            // their transition order.
            for t in &obs.transitions {
                let sequence = match t.delivery_kind() {
                    Some(kind) => {
                        let item = self.queue.enqueue(kind, t.alert().clone()).await;
                        let seq = item.sequence;
                        delivered.push(item);
                        Some(seq)
                    }
                    None => None,
                };
                changes.push(AlertChange {
                    transition: transition_name(t),
                    alert: t.alert().clone(),
                    sequence,
                });
            }
            let evicted = slot.alerts.take_evicted();

            // Index before releasing the slot so an opened alert is
            // addressable as soon as it is visible.
            let mut index = self.alert_index.write().await;
            for t in &obs.transitions {
                if let Transition::Opened(alert) = t {
                    index.insert(alert.id, key.clone());
                }
            }
            for id in &evicted {
                index.remove(id);
            }
            (obs, evicted)
        };

        if let Some(anomaly) = &obs.anomaly {
            info!(slot = %key, "{}", anomaly.describe());
        }

        let touched: Vec<Alert> = changes.iter().map(|c| c.alert.clone()).collect();
        self.persist(touched, delivered, evicted).await;

        Ok(IngestOutcome {
            source_key: key.source_key,
            metric_name: key.metric_name,
            z_score: obs.z_score,
            anomaly: obs.anomaly,
            changes,
            baseline_reset: obs.baseline_reset,
        })
    }

    /// Ingest several samples in order. One bad sample never aborts the rest.
    pub async fn ingest_batch(&self, samples: Vec<Sample>) -> Vec<Result<IngestOutcome, MonitorError>> {
        let mut results = Vec::with_capacity(samples.len());
        for sample in samples {
            results.push(self.ingest(sample).await);
        }
        results
    }

    async fn persist(&self, alerts: Vec<Alert>, deliveries: Vec<DeliveryItem>, evicted: Vec<Uuid>) {
        let Some(journal) = self.journal.clone() else {
            return;
        };
        if alerts.is_empty() && deliveries.is_empty() && evicted.is_empty() {
            return;
        }
        let result =
            tokio::task::spawn_blocking(move || journal.record(&alerts, &deliveries, &evicted)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "failed to write journal"),
            Err(e) => error!(error = %e, "journal writer panicked"),
        }
    }

    // -----------------------------------------------------------------------
    // Baselines and windows
    // -----------------------------------------------------------------------

    pub async fn baseline(&self, source_key: &str, metric_name: &str) -> Result<Baseline, MonitorError> {
        let key = SlotKey::new(source_key, metric_name);
        match self.slot(&key).await {
            Some(slot) => slot.lock().await.estimator.current(),
            None => Err(MonitorError::NoBaseline {
                source_key: key.source_key,
                metric_name: key.metric_name,
                needed: self.config.baseline.min_samples,
                have: 0,
            }),
        }
    }

    /// Snapshot of the retained window, oldest first.
    pub async fn window(&self, source_key: &str, metric_name: &str) -> Result<Vec<Sample>, MonitorError> {
        let key = SlotKey::new(source_key, metric_name);
        let slot = self.slot(&key).await.ok_or_else(|| unknown_slot(&key))?;
        let slot = slot.lock().await;
        Ok(slot.buffer.iter().cloned().collect())
    }

    /// Clear a slot's buffer and baseline; it warms up again from new samples.
    pub async fn reset_slot(&self, source_key: &str, metric_name: &str) -> Result<(), MonitorError> {
        let key = SlotKey::new(source_key, metric_name);
        let slot = self.slot(&key).await.ok_or_else(|| unknown_slot(&key))?;
        slot.lock().await.reset();
        info!(slot = %key, "slot reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    /// Alerts matching `filter`, ordered by opening time.
    pub async fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let slots: Vec<Arc<Mutex<Slot>>> = match (&filter.source_key, &filter.metric_name) {
            (Some(source_key), Some(metric_name)) => self
                .slot(&SlotKey::new(source_key.as_str(), metric_name.as_str()))
                .await
                .into_iter()
                .collect(),
            _ => self.slots.read().await.values().cloned().collect(),
        };

        let per_slot = join_all(slots.iter().map(|slot| async move {
            let slot = slot.lock().await;
            slot.alerts
                .alerts()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect::<Vec<_>>()
        }))
        .await;

        let mut alerts: Vec<Alert> = per_slot.into_iter().flatten().collect();
        alerts.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
        alerts
    }

    async fn slot_for_alert(&self, id: Uuid) -> Result<Arc<Mutex<Slot>>, MonitorError> {
        let key = self
            .alert_index
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MonitorError::AlertNotFound { id })?;
        self.slot(&key)
            .await
            .ok_or(MonitorError::AlertNotFound { id })
    }

    pub async fn alert(&self, id: Uuid) -> Result<Alert, MonitorError> {
        let slot = self.slot_for_alert(id).await?;
        let slot = slot.lock().await;
        slot.alerts
            .get(id)
            .cloned()
            .ok_or(MonitorError::AlertNotFound { id })
    }

    /// Operator acknowledgment of an OPEN alert.
    pub async fn acknowledge(&self, id: Uuid) -> Result<Alert, MonitorError> {
        let slot = self.slot_for_alert(id).await?;
        let alert = slot.lock().await.alerts.acknowledge(id, Utc::now())?;
        self.persist(vec![alert.clone()], Vec::new(), Vec::new()).await;
        Ok(alert)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub async fn subscribe(&self, filter: AlertFilter, from_now: bool) -> Subscription {
        self.queue.subscribe(filter, from_now).await
    }

    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), MonitorError> {
        self.queue.unsubscribe(id).await.map(|_| ())
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.queue.subscriptions().await
    }

    pub async fn poll(
        &self,
        id: Uuid,
        cursor: Option<u64>,
        limit: Option<usize>,
        wait: Option<Duration>,
    ) -> Result<DeliveryBatch, MonitorError> {
        match wait {
            Some(wait) if !wait.is_zero() => self.queue.poll_wait(id, cursor, limit, wait).await,
            _ => self.queue.poll(id, cursor, limit).await,
        }
    }

    /// Advance a subscription's cursor. Uses `delivery.ack_timeout_ms` when
    /// no timeout is given.
    pub async fn ack_delivery(
        &self,
        id: Uuid,
        up_to_sequence: u64,
        timeout: Option<Duration>,
    ) -> Result<u64, MonitorError> {
        let timeout =
            timeout.unwrap_or_else(|| Duration::from_millis(self.config.delivery.ack_timeout_ms));
        self.queue.ack(id, up_to_sequence, timeout).await
    }

    pub async fn stats(&self) -> EngineStats {
        let slots: Vec<Arc<Mutex<Slot>>> = self.slots.read().await.values().cloned().collect();
        let mut active_alerts = 0;
        for slot in &slots {
            active_alerts += slot.lock().await.alerts.active_count();
        }
        EngineStats {
            slots: slots.len(),
            active_alerts,
            subscriptions: self.queue.subscription_count().await,
            last_sequence: self.queue.head().await,
            started_at: self.started_at,
        }
    }
}

fn validate(sample: &Sample) -> Result<(), MonitorError> {
    let reason = if sample.source_key.is_empty() {
        Some("source_key must not be empty")
    } else if sample.metric_name.is_empty() {
        Some("metric_name must not be empty")
    } else if !sample.value.is_finite() {
        Some("value must be a finite number")
    } else {
        None
    };
    match reason {
        Some(reason) => {
            warn!(
                source_key = %sample.source_key,
                metric_name = %sample.metric_name,
                reason,
                "invalid sample"
            );
            Err(MonitorError::InvalidSample {
                source_key: sample.source_key.clone(),
                metric_name: sample.metric_name.clone(),
                reason: reason.to_string(),
            })
        }
        None => Ok(()),
    }
}

fn unknown_slot(key: &SlotKey) -> MonitorError {
    MonitorError::UnknownSlot {
        source_key: key.source_key.clone(),
        metric_name: key.metric_name.clone(),
    }
}

fn transition_name(t: &Transition) -> &'static str {
    match t {
        Transition::Opened(_) => "opened",
        Transition::Refreshed(_) => "refreshed",
        Transition::Escalated { .. } => "escalated",
        Transition::Resolved(_) => "resolved",
    }
}
