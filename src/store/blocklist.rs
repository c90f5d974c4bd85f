//! Blocklist store.
//!
//! At most one row per IP ever blocked (UNIQUE constraint); re-blocking a
//! previously unblocked IP reactivates the existing row instead of creating a
//! duplicate. Rows are never physically deleted here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::GatekeeperError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BlockEntry {
    pub id: i64,
    pub ip_address: String,
    pub reason: Option<String>,
    pub blocked_at: DateTime<Utc>,
    pub blocked_by: Option<String>,
    pub is_active: bool,
}

/// What a block request did. `AlreadyBlocked` and the unblock counterpart are
/// idempotent successes, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOutcome {
    Created,
    Reactivated,
    AlreadyBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnblockOutcome {
    Unblocked,
    NotBlocked,
}

#[derive(Clone)]
pub struct BlocklistStore {
    pool: SqlitePool,
}

impl BlocklistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// True iff an active entry exists for this exact address.
    pub async fn is_blocked(&self, ip: &str) -> Result<bool, GatekeeperError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM blocked_ip WHERE ip_address = ? AND is_active = 1")
                .bind(ip)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn block(
        &self,
        ip: &str,
        reason: Option<&str>,
        blocked_by: Option<&str>,
    ) -> Result<BlockOutcome, GatekeeperError> {
        let existing = sqlx::query_as::<_, BlockEntry>(
            "SELECT id, ip_address, reason, blocked_at, blocked_by, is_active \
             FROM blocked_ip WHERE ip_address = ?",
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(entry) if entry.is_active => Ok(BlockOutcome::AlreadyBlocked),
            Some(entry) => {
                // Reactivate: blocked_by is always refreshed, the reason only
                // when a new non-empty one is supplied.
                let reason = match reason {
                    Some(r) if !r.is_empty() => Some(r.to_string()),
                    _ => entry.reason,
                };
                sqlx::query(
                    "UPDATE blocked_ip SET is_active = 1, reason = ?, blocked_by = ? \
                     WHERE ip_address = ?",
                )
                .bind(reason)
                .bind(blocked_by)
                .bind(ip)
                .execute(&self.pool)
                .await?;
                Ok(BlockOutcome::Reactivated)
            }
            None => {
                sqlx::query(
                    "INSERT INTO blocked_ip (ip_address, reason, blocked_at, blocked_by, is_active) \
                     VALUES (?, ?, ?, ?, 1)",
                )
                .bind(ip)
                .bind(reason)
                .bind(Utc::now())
                .bind(blocked_by)
                .execute(&self.pool)
                .await?;
                Ok(BlockOutcome::Created)
            }
        }
    }

    pub async fn unblock(&self, ip: &str) -> Result<UnblockOutcome, GatekeeperError> {
        let result =
            sqlx::query("UPDATE blocked_ip SET is_active = 0 WHERE ip_address = ? AND is_active = 1")
                .bind(ip)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            Ok(UnblockOutcome::NotBlocked)
        } else {
            Ok(UnblockOutcome::Unblocked)
        }
    }

    /// Entries ordered by blocked_at descending.
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<BlockEntry>, GatekeeperError> {
        let sql = if include_inactive {
            "SELECT id, ip_address, reason, blocked_at, blocked_by, is_active \
             FROM blocked_ip ORDER BY blocked_at DESC"
        } else {
            "SELECT id, ip_address, reason, blocked_at, blocked_by, is_active \
             FROM blocked_ip WHERE is_active = 1 ORDER BY blocked_at DESC"
        };
        let rows = sqlx::query_as::<_, BlockEntry>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;

    #[tokio::test]
    async fn test_block_then_unblock_then_check() {
        let store = BlocklistStore::new(memory_pool().await);

        let outcome = store.block("1.2.3.4", Some("spam"), Some("admin")).await.unwrap();
        assert_eq!(outcome, BlockOutcome::Created);
        assert!(store.is_blocked("1.2.3.4").await.unwrap());

        let outcome = store.unblock("1.2.3.4").await.unwrap();
        assert_eq!(outcome, UnblockOutcome::Unblocked);
        assert!(!store.is_blocked("1.2.3.4").await.unwrap());
    }

    #[tokio::test]
    async fn test_reblock_reactivates_instead_of_duplicating() {
        let store = BlocklistStore::new(memory_pool().await);

        store.block("1.2.3.4", Some("spam"), Some("admin")).await.unwrap();
        store.unblock("1.2.3.4").await.unwrap();
        let outcome = store.block("1.2.3.4", None, Some("system")).await.unwrap();
        assert_eq!(outcome, BlockOutcome::Reactivated);

        let all = store.list(true).await.unwrap();
        assert_eq!(all.len(), 1);
        let entry = &all[0];
        assert!(entry.is_active);
        // blocked_by refreshed; old reason kept since none was supplied.
        assert_eq!(entry.blocked_by.as_deref(), Some("system"));
        assert_eq!(entry.reason.as_deref(), Some("spam"));
    }

    #[tokio::test]
    async fn test_reactivation_overwrites_reason_when_given() {
        let store = BlocklistStore::new(memory_pool().await);

        store.block("1.2.3.4", Some("spam"), None).await.unwrap();
        store.unblock("1.2.3.4").await.unwrap();
        store.block("1.2.3.4", Some("scraping"), None).await.unwrap();

        let all = store.list(true).await.unwrap();
        assert_eq!(all[0].reason.as_deref(), Some("scraping"));
    }

    #[tokio::test]
    async fn test_block_on_active_entry_is_noop() {
        let store = BlocklistStore::new(memory_pool().await);

        store.block("1.2.3.4", Some("spam"), Some("admin")).await.unwrap();
        let outcome = store.block("1.2.3.4", Some("other"), Some("else")).await.unwrap();
        assert_eq!(outcome, BlockOutcome::AlreadyBlocked);

        let all = store.list(true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].reason.as_deref(), Some("spam"));
    }

    #[tokio::test]
    async fn test_unblock_nonexistent_reports_not_blocked() {
        let store = BlocklistStore::new(memory_pool().await);
        let outcome = store.unblock("8.8.8.8").await.unwrap();
        assert_eq!(outcome, UnblockOutcome::NotBlocked);
    }

    #[tokio::test]
    async fn test_list_active_only() {
        let store = BlocklistStore::new(memory_pool().await);
        store.block("1.1.1.1", None, None).await.unwrap();
        store.block("2.2.2.2", None, None).await.unwrap();
        store.unblock("1.1.1.1").await.unwrap();

        let active = store.list(false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ip_address, "2.2.2.2");

        let all = store.list(true).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
