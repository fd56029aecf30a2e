//! Alert persistence using SQLite.
//!
//! Keeps every raised alert so the dashboard can list recent alerts and an
//! operator can mark them handled.

use super::rules::AlertSink;
use super::{AlertEvent, AlertKind, Severity};
use crate::route::Waypoint;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

/// Alert history backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE alerts (
///     alert_id TEXT PRIMARY KEY,     -- ALT-YYYYMMDD-NNN
///     kind TEXT NOT NULL,
///     severity TEXT NOT NULL,
///     entity_id TEXT NOT NULL,
///     message TEXT NOT NULL,
///     longitude REAL,
///     latitude REAL,
///     observed_at TEXT NOT NULL,     -- RFC 3339
///     handled INTEGER NOT NULL DEFAULT 0
/// );
/// ```
///
/// The connection sits behind a `Mutex`; callers come from the tick loop and
/// HTTP handlers.
pub struct AlertStore {
    conn: Mutex<Connection>,
}

impl AlertStore {
    /// Open or create the alert database at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open alert database")?;
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                alert_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                message TEXT NOT NULL,
                longitude REAL,
                latitude REAL,
                observed_at TEXT NOT NULL,
                handled INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )
        .context("Failed to create alerts table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_observed ON alerts(observed_at)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert an alert; re-recording the same id replaces it
    pub fn insert(&self, alert: &AlertEvent) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT OR REPLACE INTO alerts (
                    alert_id, kind, severity, entity_id, message,
                    longitude, latitude, observed_at, handled
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    alert.alert_id,
                    alert.kind.as_str(),
                    alert.severity.as_str(),
                    alert.entity_id,
                    alert.message,
                    alert.location.map(|l| l.longitude),
                    alert.location.map(|l| l.latitude),
                    alert.observed_at.to_rfc3339(),
                    alert.handled,
                ],
            )
            .context("Failed to store alert")?;

        Ok(())
    }

    /// Most recent alerts first
    pub fn recent(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT alert_id, kind, severity, entity_id, message,
                       longitude, latitude, observed_at, handled
                FROM alerts
                ORDER BY observed_at DESC, alert_id DESC
                LIMIT ?1
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![limit as i64])
            .context("Failed to execute query")?;

        let mut alerts = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            alerts.push(alert_from_row(row)?);
        }

        Ok(alerts)
    }

    /// Returns false if no alert has that id
    pub fn mark_handled(&self, alert_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE alerts SET handled = 1 WHERE alert_id = ?1",
                params![alert_id],
            )
            .context("Failed to update alert")?;

        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
            .context("Failed to count alerts")?;
        Ok(count as usize)
    }
}

impl AlertSink for AlertStore {
    fn record(&self, alert: &AlertEvent) -> Result<()> {
        self.insert(alert)
    }
}

fn alert_from_row(row: &Row<'_>) -> Result<AlertEvent> {
    let kind: String = row.get(1)?;
    let severity: String = row.get(2)?;
    let longitude: Option<f64> = row.get(5)?;
    let latitude: Option<f64> = row.get(6)?;
    let observed_at: String = row.get(7)?;

    let location = match (longitude, latitude) {
        (Some(lon), Some(lat)) => Some(Waypoint::new(lon, lat)),
        _ => None,
    };

    Ok(AlertEvent {
        alert_id: row.get(0)?,
        kind: kind.parse::<AlertKind>().map_err(|e| anyhow!(e))?,
        severity: severity.parse::<Severity>().map_err(|e| anyhow!(e))?,
        entity_id: row.get(3)?,
        message: row.get(4)?,
        location,
        observed_at: DateTime::parse_from_rfc3339(&observed_at)
            .context("Invalid observed_at timestamp")?
            .with_timezone(&Utc),
        handled: row.get(8)?,
    })
}
