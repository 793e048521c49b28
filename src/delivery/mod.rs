//! Subscription and delivery -- fan-out of alert transitions to consumers.
//!
//! Delivery is at-least-once: polling never moves a cursor, only an explicit
//! acknowledgment does. Consumers deduplicate on `(alert.id, sequence)`.

pub mod queue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{Alert, AlertFilter};

pub use queue::DeliveryQueue;

/// Which transition a delivery item announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Opened,
    Escalated,
    Resolved,
}

impl DeliveryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryKind::Opened => "opened",
            DeliveryKind::Escalated => "escalated",
            DeliveryKind::Resolved => "resolved",
        }
    }
}

/// One entry in the global delivery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryItem {
    pub sequence: u64,
    pub kind: DeliveryKind,
    /// The alert as it was when the transition happened.
    pub alert: Alert,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub filter: AlertFilter,
    /// Highest acknowledged sequence number.
    pub cursor: u64,
    pub created_at: DateTime<Utc>,
}

/// The result of a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub subscription_id: Uuid,
    /// Cursor the poll read from.
    pub cursor: u64,
    pub items: Vec<DeliveryItem>,
    /// Acknowledge up to this to consume the batch, including items the
    /// filter skipped.
    pub next_cursor: u64,
    /// Highest sequence number assigned so far.
    pub head: u64,
    /// Items after `cursor` were dropped from the bounded log before this poll.
    pub truncated: bool,
}
