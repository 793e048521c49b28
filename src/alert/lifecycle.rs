//! Per-slot alert state machine.
//!
//! NONE -> OPEN -> (ACKNOWLEDGED) -> RESOLVED -> NONE, tracked separately for
//! each anomaly kind. A slot never holds more than one active alert per kind.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Alert, AlertState};
use crate::config::LifecycleConfig;
use crate::delivery::DeliveryKind;
use crate::detect::{AnomalyEvent, AnomalyKind, Severity};
use crate::error::MonitorError;
use crate::ingest::SlotKey;

/// A state change produced by the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Opened(Alert),
    /// New detection on an active alert without a severity increase.
    Refreshed(Alert),
    Escalated { alert: Alert, previous: Severity },
    Resolved(Alert),
}

impl Transition {
    pub fn alert(&self) -> &Alert {
        match self {
            Transition::Opened(a) | Transition::Refreshed(a) | Transition::Resolved(a) => a,
            Transition::Escalated { alert, .. } => alert,
        }
    }

    /// What subscribers are told about this transition, if anything.
    pub fn delivery_kind(&self) -> Option<DeliveryKind> {
        match self {
            Transition::Opened(_) => Some(DeliveryKind::Opened),
            Transition::Escalated { .. } => Some(DeliveryKind::Escalated),
            Transition::Resolved(_) => Some(DeliveryKind::Resolved),
            Transition::Refreshed(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveAlert {
    alert: Alert,
    calm_streak: u32,
}

#[derive(Debug)]
pub struct AlertLifecycle {
    key: SlotKey,
    resolve_after: u32,
    retain_resolved: usize,
    active: BTreeMap<AnomalyKind, ActiveAlert>,
    history: VecDeque<Alert>,
    evicted: Vec<Uuid>,
}

impl AlertLifecycle {
    pub fn new(key: SlotKey, config: &LifecycleConfig) -> Self {
        Self {
            key,
            resolve_after: config.resolve_after,
            retain_resolved: config.retain_resolved,
            active: BTreeMap::new(),
            history: VecDeque::new(),
            evicted: Vec::new(),
        }
    }

    /// Fold a new detection into the slot: open a fresh alert or refresh the
    /// active one of the same kind.
    pub fn on_anomaly(&mut self, event: AnomalyEvent) -> Transition {
        for entry in self.active.values_mut() {
            entry.calm_streak = 0;
        }

        if let Some(entry) = self.active.get_mut(&event.kind) {
            let alert = &mut entry.alert;
            let severity = event.severity;
            alert.anomaly = event;
            alert.detections += 1;
            alert.revision += 1;

            if severity > alert.severity {
                let previous = alert.severity;
                alert.severity = severity;
                info!(
                    alert_id = %alert.id,
                    slot = %self.key,
                    %previous,
                    %severity,
                    "alert escalated"
                );
                return Transition::Escalated {
                    alert: alert.clone(),
                    previous,
                };
            }
            debug!(alert_id = %alert.id, slot = %self.key, "alert refreshed");
            return Transition::Refreshed(alert.clone());
        }

        let kind = event.kind;
        let alert = Alert::open(event);
        info!(
            alert_id = %alert.id,
            slot = %self.key,
            %kind,
            severity = %alert.severity,
            "alert opened"
        );
        self.active.insert(
            kind,
            ActiveAlert {
                alert: alert.clone(),
                calm_streak: 0,
            },
        );
        Transition::Opened(alert)
    }

    /// Record a calm sample observed at `at`. Returns the alerts it resolved.
    pub fn on_calm(&mut self, at: DateTime<Utc>) -> Vec<Transition> {
        let resolve_after = self.resolve_after;
        let mut ready = Vec::new();
        for (kind, entry) in self.active.iter_mut() {
            entry.calm_streak += 1;
            if entry.calm_streak >= resolve_after {
                ready.push(*kind);
            }
        }

        let mut resolved = Vec::with_capacity(ready.len());
        for kind in ready {
            if let Some(entry) = self.active.remove(&kind) {
                let mut alert = entry.alert;
                alert.state = AlertState::Resolved;
                alert.resolved_at = Some(at);
                alert.revision += 1;
                info!(alert_id = %alert.id, slot = %self.key, "alert resolved");
                self.push_history(alert.clone());
                resolved.push(Transition::Resolved(alert));
            }
        }
        resolved
    }

    /// Operator acknowledgment. Only an OPEN alert can be acknowledged.
    pub fn acknowledge(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<Alert, MonitorError> {
        if let Some(entry) = self.active.values_mut().find(|e| e.alert.id == id) {
            let state = entry.alert.state;
            if state != AlertState::Open {
                return Err(self.invalid_transition(id, state, "acknowledge"));
            }
            let alert = &mut entry.alert;
            alert.state = AlertState::Acknowledged;
            alert.acknowledged_at = Some(at);
            alert.revision += 1;
            info!(alert_id = %id, slot = %self.key, "alert acknowledged");
            return Ok(alert.clone());
        }

        if let Some(alert) = self.history.iter().find(|a| a.id == id) {
            return Err(self.invalid_transition(id, alert.state, "acknowledge"));
        }

        Err(MonitorError::AlertNotFound { id })
    }

    fn invalid_transition(&self, id: Uuid, from: AlertState, action: &'static str) -> MonitorError {
        MonitorError::InvalidStateTransition {
            id,
            source_key: self.key.source_key.clone(),
            metric_name: self.key.metric_name.clone(),
            from,
            action,
        }
    }

    fn push_history(&mut self, alert: Alert) {
        self.history.push_back(alert);
        while self.history.len() > self.retain_resolved {
            if let Some(old) = self.history.pop_front() {
                self.evicted.push(old.id);
            }
        }
    }

    /// Reinstate an alert loaded from the journal.
    pub fn restore(&mut self, alert: Alert) {
        if alert.state.is_active() {
            let kind = alert.kind();
            self.active.insert(
                kind,
                ActiveAlert {
                    alert,
                    calm_streak: 0,
                },
            );
        } else {
            self.push_history(alert);
        }
    }

    /// Ids of resolved alerts that fell out of the retained history since the
    /// last call.
    pub fn take_evicted(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.evicted)
    }

    pub fn get(&self, id: Uuid) -> Option<&Alert> {
        self.alerts().find(|a| a.id == id)
    }

    pub fn active(&self, kind: AnomalyKind) -> Option<&Alert> {
        self.active.get(&kind).map(|e| &e.alert)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active alerts followed by retained resolved ones.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> + '_ {
        self.active
            .values()
            .map(|e| &e.alert)
            .chain(self.history.iter())
    }
}
