//! Durable collections backing the gatekeeper.
//!
//! Three tables: the request log (append-only), the blocklist (one row per IP
//! ever blocked, toggled active/inactive), and the suspicion flags written by
//! the anomaly scanner. The store's own uniqueness and transaction guarantees
//! are the only concurrency control; no application-level locking.

pub mod blocklist;
pub mod request_log;
pub mod suspicion;

pub use blocklist::{BlockEntry, BlockOutcome, BlocklistStore, UnblockOutcome};
pub use request_log::{IpRequestCount, NewRequestRecord, RequestLogStore, RequestRecord};
pub use suspicion::{SuspicionEntry, SuspicionStore};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::GatekeeperError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS request_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    path TEXT NOT NULL,
    method TEXT NOT NULL DEFAULT 'GET',
    user_agent TEXT,
    country TEXT,
    city TEXT
);
CREATE INDEX IF NOT EXISTS idx_request_log_timestamp ON request_log (timestamp);
CREATE INDEX IF NOT EXISTS idx_request_log_ip_timestamp ON request_log (ip_address, timestamp);
CREATE INDEX IF NOT EXISTS idx_request_log_path_timestamp ON request_log (path, timestamp);

CREATE TABLE IF NOT EXISTS blocked_ip (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL UNIQUE,
    reason TEXT,
    blocked_at TEXT NOT NULL,
    blocked_by TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_blocked_ip_active ON blocked_ip (ip_address, is_active);

CREATE TABLE IF NOT EXISTS suspicious_ip (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_suspicious_ip_ip ON suspicious_ip (ip_address);
"#;

/// Open the SQLite pool (creating the file if missing) and ensure the schema.
pub async fn connect(url: &str) -> Result<SqlitePool, GatekeeperError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), GatekeeperError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// In-memory pool for store tests. Single connection, since each SQLite
/// `:memory:` connection is its own database.
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    init_schema(&pool).await.expect("schema init");
    pool
}
