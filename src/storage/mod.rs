//! SQLite journal -- durable copy of alerts and the delivery log.
//!
//! The in-memory engine stays authoritative; the journal lets a restarted
//! process pick up open alerts, resolved history, and the sequence watermark.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use uuid::Uuid;

use crate::alert::Alert;
use crate::delivery::DeliveryItem;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Delivery rows are pruned back to the retention limit whenever a sequence
/// number crosses a multiple of this.
const PRUNE_EVERY: u64 = 256;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

#[derive(Clone)]
pub struct Journal {
    pool: Pool,
    retain_deliveries: usize,
}

impl Journal {
    pub fn open(path: &Path, retain_deliveries: usize) -> Result<Self> {
        let pool = open_pool(path)
            .with_context(|| format!("failed to open journal at {}", path.display()))?;
        tracing::info!(path = %path.display(), "journal opened");
        Ok(Self {
            pool,
            retain_deliveries,
        })
    }

    /// Persist a batch of alert snapshots and delivery items atomically.
    ///
    /// Alert rows only move forward: a snapshot with a lower revision than
    /// the stored one is ignored, so concurrent writers cannot regress state.
    pub fn record(&self, alerts: &[Alert], deliveries: &[DeliveryItem], evicted: &[Uuid]) -> Result<()> {
        if alerts.is_empty() && deliveries.is_empty() && evicted.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO alerts (id, source_key, metric_name, kind, state, severity, revision, payload_json, opened_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    severity = excluded.severity,
                    revision = excluded.revision,
                    payload_json = excluded.payload_json,
                    updated_at = datetime('now')
                 WHERE excluded.revision > alerts.revision",
            )?;
            for alert in alerts {
                let revision = i64::try_from(alert.revision).unwrap_or(i64::MAX);
                upsert.execute(params![
                    alert.id.to_string(),
                    alert.source_key(),
                    alert.metric_name(),
                    alert.kind().to_string(),
                    alert.state.to_string(),
                    alert.severity.to_string(),
                    revision,
                    serde_json::to_string(alert)?,
                    alert.opened_at.to_rfc3339(),
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO deliveries (sequence, alert_id, kind, payload_json, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for item in deliveries {
                insert.execute(params![
                    i64::try_from(item.sequence)?,
                    item.alert.id.to_string(),
                    item.kind.as_str(),
                    serde_json::to_string(item)?,
                    item.enqueued_at.to_rfc3339(),
                ])?;
            }

            let mut delete = tx.prepare("DELETE FROM alerts WHERE id = ?1")?;
            for id in evicted {
                delete.execute(params![id.to_string()])?;
            }
        }

        if deliveries.iter().any(|d| d.sequence % PRUNE_EVERY == 0) {
            let keep = i64::try_from(self.retain_deliveries).unwrap_or(i64::MAX);
            tx.execute(
                "DELETE FROM deliveries WHERE sequence <= (SELECT MAX(sequence) FROM deliveries) - ?1",
                params![keep],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_alerts(&self) -> Result<Vec<Alert>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, payload_json FROM alerts ORDER BY opened_at ASC")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut alerts = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            match serde_json::from_str::<Alert>(&json) {
                Ok(alert) => alerts.push(alert),
                Err(e) => tracing::error!(alert_id = %id, error = %e, "skipping unreadable alert row"),
            }
        }
        Ok(alerts)
    }

    /// The newest `limit` deliveries (oldest first) and the highest sequence
    /// number ever stored.
    pub fn load_deliveries(&self, limit: usize) -> Result<(Vec<DeliveryItem>, u64)> {
        let conn = self.pool.get()?;
        let watermark: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM deliveries",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT sequence, payload_json FROM deliveries ORDER BY sequence DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(i64, String)> = stmt
            .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (sequence, json) in rows.into_iter().rev() {
            match serde_json::from_str::<DeliveryItem>(&json) {
                Ok(item) => items.push(item),
                Err(e) => tracing::error!(sequence, error = %e, "skipping unreadable delivery row"),
            }
        }
        Ok((items, u64::try_from(watermark).unwrap_or(0)))
    }
}
