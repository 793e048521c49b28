//! Global delivery log plus subscriber cursors.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeliveryBatch, DeliveryItem, DeliveryKind, Subscription};
use crate::alert::{Alert, AlertFilter};
use crate::config::DeliveryConfig;
use crate::error::MonitorError;

/// Bounded, sequence-ordered log. Sequence numbers are assigned under the
/// same lock that appends, so log order always equals sequence order.
#[derive(Debug)]
struct DeliveryLog {
    items: VecDeque<DeliveryItem>,
    last_sequence: u64,
    capacity: usize,
}

impl DeliveryLog {
    fn append(&mut self, kind: DeliveryKind, alert: Alert) -> DeliveryItem {
        self.last_sequence += 1;
        let item = DeliveryItem {
            sequence: self.last_sequence,
            kind,
            alert,
            enqueued_at: Utc::now(),
        };
        self.items.push_back(item.clone());
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        item
    }

    fn after(&self, cursor: u64) -> impl Iterator<Item = &DeliveryItem> + '_ {
        let start = self.items.partition_point(|i| i.sequence <= cursor);
        self.items.range(start..)
    }

    fn truncated_after(&self, cursor: u64) -> bool {
        self.items
            .front()
            .is_some_and(|first| first.sequence > cursor.saturating_add(1))
            || (self.items.is_empty() && self.last_sequence > cursor)
    }
}

pub struct DeliveryQueue {
    log: Mutex<DeliveryLog>,
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    notify: Notify,
    config: DeliveryConfig,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            log: Mutex::new(DeliveryLog {
                items: VecDeque::new(),
                last_sequence: 0,
                capacity: config.log_capacity,
            }),
            subscriptions: RwLock::new(HashMap::new()),
            notify: Notify::new(),
            config,
        }
    }

    /// Append a transition to the log and wake long-polling consumers.
    pub async fn enqueue(&self, kind: DeliveryKind, alert: Alert) -> DeliveryItem {
        let item = self.log.lock().await.append(kind, alert);
        debug!(
            sequence = item.sequence,
            kind = kind.as_str(),
            alert_id = %item.alert.id,
            "delivery enqueued"
        );
        self.notify.notify_waiters();
        item
    }

    /// Reload items recovered from storage. Items must be sorted by sequence.
    pub async fn restore(&self, items: Vec<DeliveryItem>, watermark: u64) {
        let mut log = self.log.lock().await;
        let last_in_items = items.last().map(|i| i.sequence).unwrap_or(0);
        log.last_sequence = log.last_sequence.max(watermark).max(last_in_items);
        log.items = items.into();
        while log.items.len() > log.capacity {
            log.items.pop_front();
        }
        info!(
            retained = log.items.len(),
            last_sequence = log.last_sequence,
            "delivery log restored"
        );
    }

    /// Highest sequence number assigned so far.
    pub async fn head(&self) -> u64 {
        self.log.lock().await.last_sequence
    }

    pub async fn subscribe(&self, filter: AlertFilter, from_now: bool) -> Subscription {
        let cursor = if from_now { self.head().await } else { 0 };
        let sub = Subscription {
            id: Uuid::new_v4(),
            filter,
            cursor,
            created_at: Utc::now(),
        };
        self.subscriptions.write().await.insert(sub.id, sub.clone());
        info!(subscription_id = %sub.id, cursor, "subscription created");
        sub
    }

    pub async fn unsubscribe(&self, id: Uuid) -> Result<Subscription, MonitorError> {
        let removed = self.subscriptions.write().await.remove(&id);
        match removed {
            Some(sub) => {
                info!(subscription_id = %id, "subscription removed");
                // Wake long polls so they notice the subscription is gone.
                self.notify.notify_waiters();
                Ok(sub)
            }
            None => Err(MonitorError::SubscriptionNotFound { id }),
        }
    }

    pub async fn subscription(&self, id: Uuid) -> Result<Subscription, MonitorError> {
        self.subscriptions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MonitorError::SubscriptionNotFound { id })
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> =
            self.subscriptions.read().await.values().cloned().collect();
        subs.sort_by_key(|s| (s.created_at, s.id));
        subs
    }

    /// Items after `cursor` (the stored cursor if `None`) that match the
    /// subscription's filter, oldest first. Never moves the stored cursor.
    pub async fn poll(
        &self,
        id: Uuid,
        cursor: Option<u64>,
        limit: Option<usize>,
    ) -> Result<DeliveryBatch, MonitorError> {
        // Snapshot the subscription so a concurrent unsubscribe cannot pull
        // it out from under this read.
        let sub = self.subscription(id).await?;
        Ok(self.read_batch(&sub, cursor, limit).await)
    }

    async fn read_batch(&self, sub: &Subscription, cursor: Option<u64>, limit: Option<usize>) -> DeliveryBatch {
        let cursor = cursor.unwrap_or(sub.cursor);
        let limit = limit
            .unwrap_or(self.config.max_batch)
            .clamp(1, self.config.max_batch);

        let log = self.log.lock().await;
        let mut items: Vec<DeliveryItem> = Vec::new();
        let mut next_cursor = log.last_sequence.max(cursor);
        for item in log.after(cursor) {
            if !sub.filter.matches(&item.alert) {
                continue;
            }
            if items.len() == limit {
                next_cursor = items.last().map_or(cursor, |i| i.sequence);
                break;
            }
            items.push(item.clone());
        }

        DeliveryBatch {
            subscription_id: sub.id,
            cursor,
            truncated: log.truncated_after(cursor),
            head: log.last_sequence,
            next_cursor,
            items,
        }
    }

    /// Like [`poll`](Self::poll), but when nothing is pending waits up to
    /// `wait` (capped by `max_wait_ms`) for new items.
    ///
    /// The subscription is looked up once. If it is removed while waiting,
    /// the wait ends with whatever the snapshot reads rather than an error.
    pub async fn poll_wait(
        &self,
        id: Uuid,
        cursor: Option<u64>,
        limit: Option<usize>,
        wait: Duration,
    ) -> Result<DeliveryBatch, MonitorError> {
        let sub = self.subscription(id).await?;
        let wait = wait.min(Duration::from_millis(self.config.max_wait_ms));
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before polling so an enqueue in between is not missed.
            notified.as_mut().enable();

            let batch = self.read_batch(&sub, cursor, limit).await;
            if !batch.items.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            if !self.subscriptions.read().await.contains_key(&id) {
                debug!(subscription_id = %id, "long poll ended by unsubscribe");
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(batch);
            }
        }
    }

    /// Advance a subscription's cursor to `up_to` (clamped to the head).
    /// Cursors never move backwards. If the subscription lock cannot be
    /// taken within `timeout` the cursor is left untouched.
    pub async fn ack(&self, id: Uuid, up_to: u64, timeout: Duration) -> Result<u64, MonitorError> {
        let advance = async {
            let head = self.head().await;
            let mut subs = self.subscriptions.write().await;
            let sub = subs
                .get_mut(&id)
                .ok_or(MonitorError::SubscriptionNotFound { id })?;
            let target = up_to.min(head);
            if target > sub.cursor {
                sub.cursor = target;
                debug!(subscription_id = %id, cursor = target, "cursor advanced");
            }
            Ok::<u64, MonitorError>(sub.cursor)
        };

        match tokio::time::timeout(timeout, advance).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(subscription_id = %id, timeout_ms, "delivery acknowledgment timed out");
                Err(MonitorError::DeliveryTimeout {
                    subscription: id,
                    timeout_ms,
                })
            }
        }
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn hold_subscriptions(&self) -> tokio::sync::RwLockWriteGuard<'_, HashMap<Uuid, Subscription>> {
        self.subscriptions.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertState;
    use crate::detect::Severity;
    use crate::testutil::{alert, resolved};
    use std::sync::Arc;

    fn queue() -> DeliveryQueue {
        DeliveryQueue::new(DeliveryConfig::default())
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic() {
        let q = queue();
        let a = q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        let b = q.enqueue(DeliveryKind::Resolved, resolved(a.alert.clone())).await;
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(q.head().await, 2);
    }

    #[tokio::test]
    async fn test_poll_without_ack_redelivers() {
        let q = queue();
        let sub = q.subscribe(AlertFilter::default(), false).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-b", "mem", Severity::Warning)).await;

        let first = q.poll(sub.id, None, None).await.unwrap();
        let second = q.poll(sub.id, None, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first.next_cursor, 2);
    }

    #[tokio::test]
    async fn test_ack_advances_and_never_rewinds() {
        let q = queue();
        let sub = q.subscribe(AlertFilter::default(), false).await;
        for _ in 0..3 {
            q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        }
        let timeout = Duration::from_secs(1);
        assert_eq!(q.ack(sub.id, 2, timeout).await.unwrap(), 2);
        let batch = q.poll(sub.id, None, None).await.unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].sequence, 3);

        assert_eq!(q.ack(sub.id, 1, timeout).await.unwrap(), 2);
        // Beyond the head clamps to the head.
        assert_eq!(q.ack(sub.id, 99, timeout).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_filter_applies_and_cursor_skips_filtered() {
        let q = queue();
        let filter = AlertFilter {
            source_key: Some("svc-a".into()),
            ..AlertFilter::default()
        };
        let sub = q.subscribe(filter, false).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-b", "cpu", Severity::High)).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-b", "cpu", Severity::High)).await;

        let batch = q.poll(sub.id, None, None).await.unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].alert.source_key(), "svc-a");
        assert_eq!(batch.next_cursor, 3);
    }

    #[tokio::test]
    async fn test_limit_sets_next_cursor_to_last_item() {
        let q = queue();
        let sub = q.subscribe(AlertFilter::default(), false).await;
        for _ in 0..5 {
            q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        }
        let batch = q.poll(sub.id, None, Some(2)).await.unwrap();
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.next_cursor, 2);

        let batch = q.poll(sub.id, Some(batch.next_cursor), Some(2)).await.unwrap();
        assert_eq!(batch.items[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_subscribe_from_now_skips_history() {
        let q = queue();
        q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        let sub = q.subscribe(AlertFilter::default(), true).await;
        assert_eq!(sub.cursor, 1);
        assert!(q.poll(sub.id, None, None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_log_reports_truncation() {
        let q = DeliveryQueue::new(DeliveryConfig {
            log_capacity: 2,
            ..DeliveryConfig::default()
        });
        let sub = q.subscribe(AlertFilter::default(), false).await;
        for _ in 0..4 {
            q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        }
        let batch = q.poll(sub.id, None, None).await.unwrap();
        assert!(batch.truncated);
        let seqs: Vec<u64> = batch.items.iter().map(|i| i.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);

        let batch = q.poll(sub.id, Some(2), None).await.unwrap();
        assert!(!batch.truncated);
    }

    #[tokio::test]
    async fn test_poll_at_max_cursor_is_empty_and_not_truncated() {
        let q = queue();
        let sub = q.subscribe(AlertFilter::default(), false).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;

        let batch = q.poll(sub.id, Some(u64::MAX), None).await.unwrap();
        assert!(batch.items.is_empty());
        assert!(!batch.truncated);
        assert_eq!(batch.next_cursor, u64::MAX);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_long_poll_returns_snapshot() {
        let q = Arc::new(queue());
        let sub = q.subscribe(AlertFilter::default(), false).await;

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.poll_wait(sub.id, None, None, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.unsubscribe(sub.id).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("long poll should end on unsubscribe")
            .unwrap()
            .unwrap();
        assert_eq!(batch.subscription_id, sub.id);
        assert!(batch.items.is_empty());

        // Later polls see the subscription gone.
        assert!(matches!(
            q.poll(sub.id, None, None).await,
            Err(MonitorError::SubscriptionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_subscription() {
        let q = queue();
        let id = Uuid::new_v4();
        assert!(matches!(
            q.poll(id, None, None).await,
            Err(MonitorError::SubscriptionNotFound { .. })
        ));
        assert!(matches!(
            q.unsubscribe(id).await,
            Err(MonitorError::SubscriptionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ack_times_out_without_advancing() {
        let q = queue();
        let sub = q.subscribe(AlertFilter::default(), false).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;

        let guard = q.hold_subscriptions().await;
        let err = q
            .ack(sub.id, 1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::DeliveryTimeout { timeout_ms: 20, .. }));
        drop(guard);

        assert_eq!(q.subscription(sub.id).await.unwrap().cursor, 0);
        assert_eq!(q.ack(sub.id, 1, Duration::from_secs(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_poll_wait_wakes_on_enqueue() {
        let q = Arc::new(queue());
        let sub = q.subscribe(AlertFilter::default(), false).await;

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.poll_wait(sub.id, None, None, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::Critical)).await;

        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].alert.state, AlertState::Open);
    }

    #[tokio::test]
    async fn test_poll_wait_times_out_empty() {
        let q = queue();
        let sub = q.subscribe(AlertFilter::default(), false).await;
        let batch = q
            .poll_wait(sub.id, None, None, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(batch.items.is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_watermark() {
        let q = queue();
        let item = DeliveryItem {
            sequence: 7,
            kind: DeliveryKind::Opened,
            alert: alert("svc-a", "cpu", Severity::High),
            enqueued_at: Utc::now(),
        };
        q.restore(vec![item], 9).await;
        assert_eq!(q.head().await, 9);
        let next = q.enqueue(DeliveryKind::Opened, alert("svc-a", "cpu", Severity::High)).await;
        assert_eq!(next.sequence, 10);
    }
}
