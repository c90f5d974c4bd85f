//! Suspicion flag store.
//!
//! Rows are written by the anomaly scanner and cleared by an external review
//! workflow; the gatekeeper itself never updates or deletes them. The
//! existence check is global across history, which is what makes repeated
//! scans idempotent for an already-flagged IP.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::GatekeeperError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SuspicionEntry {
    pub id: i64,
    pub ip_address: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SuspicionStore {
    pool: SqlitePool,
}

impl SuspicionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, ip: &str) -> Result<bool, GatekeeperError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM suspicious_ip WHERE ip_address = ? LIMIT 1")
                .bind(ip)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn insert(&self, ip: &str, reason: &str) -> Result<(), GatekeeperError> {
        sqlx::query("INSERT INTO suspicious_ip (ip_address, reason, created_at) VALUES (?, ?, ?)")
            .bind(ip)
            .bind(reason)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<SuspicionEntry>, GatekeeperError> {
        let rows = sqlx::query_as::<_, SuspicionEntry>(
            "SELECT id, ip_address, reason, created_at \
             FROM suspicious_ip ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
