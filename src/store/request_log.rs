//! Request log store.
//!
//! Logically append-only: one row per admitted request, never updated or
//! deleted by the gatekeeper (retention is an operational concern). Windowed
//! queries feed the anomaly scanner; `recent` feeds the admin surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::GatekeeperError;

/// One admitted request. Immutable once written; the timestamp is fixed at
/// creation and rows are returned newest first.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RequestRecord {
    pub id: i64,
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub method: String,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Fields supplied by the admission middleware; id and timestamp are assigned
/// on insert.
#[derive(Debug, Clone)]
pub struct NewRequestRecord {
    pub ip_address: String,
    pub path: String,
    pub method: String,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Per-IP aggregate over a window.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IpRequestCount {
    pub ip_address: String,
    pub request_count: i64,
}

#[derive(Clone)]
pub struct RequestLogStore {
    pool: SqlitePool,
}

impl RequestLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, record: NewRequestRecord) -> Result<(), GatekeeperError> {
        sqlx::query(
            "INSERT INTO request_log (ip_address, timestamp, path, method, user_agent, country, city) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.ip_address)
        .bind(Utc::now())
        .bind(&record.path)
        .bind(&record.method)
        .bind(&record.user_agent)
        .bind(&record.country)
        .bind(&record.city)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All records with timestamp >= `since`, newest first.
    pub async fn query_window(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, GatekeeperError> {
        let rows = sqlx::query_as::<_, RequestRecord>(
            "SELECT id, ip_address, timestamp, path, method, user_agent, country, city \
             FROM request_log WHERE timestamp >= ? ORDER BY timestamp DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Windowed records restricted to the given path set.
    pub async fn query_window_filtered(
        &self,
        since: DateTime<Utc>,
        paths: &[String],
    ) -> Result<Vec<RequestRecord>, GatekeeperError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, ip_address, timestamp, path, method, user_agent, country, city \
             FROM request_log WHERE timestamp >= ",
        );
        builder.push_bind(since);
        builder.push(" AND path IN (");
        let mut separated = builder.separated(", ");
        for path in paths {
            separated.push_bind(path);
        }
        separated.push_unseparated(")");
        builder.push(" ORDER BY timestamp DESC");

        let rows = builder
            .build_query_as::<RequestRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Request count per IP within the window.
    pub async fn count_by_ip(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IpRequestCount>, GatekeeperError> {
        let rows = sqlx::query_as::<_, IpRequestCount>(
            "SELECT ip_address, COUNT(*) AS request_count \
             FROM request_log WHERE timestamp >= ? GROUP BY ip_address",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent records for display.
    pub async fn recent(&self, limit: i64) -> Result<Vec<RequestRecord>, GatekeeperError> {
        let rows = sqlx::query_as::<_, RequestRecord>(
            "SELECT id, ip_address, timestamp, path, method, user_agent, country, city \
             FROM request_log ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;
    use chrono::Duration;

    fn record(ip: &str, path: &str) -> NewRequestRecord {
        NewRequestRecord {
            ip_address: ip.to_string(),
            path: path.to_string(),
            method: "GET".to_string(),
            user_agent: Some("test-agent".to_string()),
            country: None,
            city: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_query_window() {
        let store = RequestLogStore::new(memory_pool().await);
        store.append(record("1.2.3.4", "/index")).await.unwrap();
        store.append(record("1.2.3.4", "/about")).await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        let rows = store.query_window(since).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ip_address, "1.2.3.4");
        assert_eq!(rows[0].method, "GET");
        assert_eq!(rows[0].user_agent.as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn test_window_excludes_nothing_before_since() {
        let store = RequestLogStore::new(memory_pool().await);
        store.append(record("1.2.3.4", "/index")).await.unwrap();

        // A window starting in the future sees nothing.
        let since = Utc::now() + Duration::hours(1);
        let rows = store.query_window(since).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_query_window_filtered_by_path() {
        let store = RequestLogStore::new(memory_pool().await);
        store.append(record("1.2.3.4", "/admin")).await.unwrap();
        store.append(record("5.6.7.8", "/index")).await.unwrap();
        store.append(record("9.9.9.9", "/login")).await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        let paths = vec!["/admin".to_string(), "/login".to_string()];
        let rows = store.query_window_filtered(since, &paths).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.path == "/admin" || r.path == "/login"));
    }

    #[tokio::test]
    async fn test_query_window_filtered_empty_path_set() {
        let store = RequestLogStore::new(memory_pool().await);
        store.append(record("1.2.3.4", "/admin")).await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        let rows = store.query_window_filtered(since, &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_count_by_ip() {
        let store = RequestLogStore::new(memory_pool().await);
        for _ in 0..3 {
            store.append(record("1.2.3.4", "/index")).await.unwrap();
        }
        store.append(record("5.6.7.8", "/index")).await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        let counts = store.count_by_ip(since).await.unwrap();
        assert_eq!(counts.len(), 2);

        let busy = counts.iter().find(|c| c.ip_address == "1.2.3.4").unwrap();
        assert_eq!(busy.request_count, 3);
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let store = RequestLogStore::new(memory_pool().await);
        for i in 0..5 {
            store.append(record("1.2.3.4", &format!("/p{i}"))).await.unwrap();
        }

        let rows = store.recent(3).await.unwrap();
        assert_eq!(rows.len(), 3);
    }
}
