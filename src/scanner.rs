//! Periodic anomaly scanner.
//!
//! Runs out of the request path, on a fixed schedule. Each run aggregates the
//! request log over a trailing window and writes suspicion flags:
//!
//! - Rule A (volumetric): IPs at or above the request-count threshold.
//! - Rule B (sensitive paths): IPs that touched a configured sensitive path.
//!
//! Rule A is evaluated before Rule B, so the volumetric reason wins for an IP
//! matching both. The existence check against the suspicion store is global
//! across history: an IP flagged once is never re-flagged until an operator
//! clears its entry. Any store error aborts the run; the scheduler retries at
//! the next tick, never immediately.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::GatekeeperError;
use crate::store::{RequestLogStore, SuspicionStore};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Trailing window each run aggregates over.
    pub window: Duration,
    /// Requests per window at which an IP is flagged.
    pub volumetric_threshold: i64,
    /// Paths whose mere access flags the requesting IP.
    pub sensitive_paths: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            volumetric_threshold: 100,
            sensitive_paths: vec!["/admin".to_string(), "/login".to_string()],
        }
    }
}

/// Summary of one scan, for operator logs and the admin trigger endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Distinct IPs seen in the window.
    pub window_ips: usize,
    pub volumetric_flags: usize,
    pub sensitive_path_flags: usize,
}

#[derive(Clone)]
pub struct AnomalyScanner {
    config: ScanConfig,
    request_log: RequestLogStore,
    suspicions: SuspicionStore,
}

impl AnomalyScanner {
    pub fn new(config: ScanConfig, request_log: RequestLogStore, suspicions: SuspicionStore) -> Self {
        Self {
            config,
            request_log,
            suspicions,
        }
    }

    /// One sweep over the trailing window.
    ///
    /// Stateless between runs except for what lives in the stores. At most
    /// one new suspicion entry per IP per run.
    pub async fn run_scan(&self) -> Result<ScanReport, GatekeeperError> {
        let since = Utc::now() - ChronoDuration::seconds(self.config.window.as_secs() as i64);
        let mut report = ScanReport::default();
        let mut flagged_this_run: HashSet<String> = HashSet::new();

        let counts = self.request_log.count_by_ip(since).await?;
        report.window_ips = counts.len();

        for entry in counts {
            if entry.request_count < self.config.volumetric_threshold {
                continue;
            }
            if flagged_this_run.contains(&entry.ip_address)
                || self.suspicions.exists(&entry.ip_address).await?
            {
                continue;
            }
            let reason = format!(
                "Exceeded {} requests/hour: {} requests",
                self.config.volumetric_threshold, entry.request_count
            );
            self.suspicions.insert(&entry.ip_address, &reason).await?;
            tracing::warn!(
                ip = %entry.ip_address,
                count = entry.request_count,
                "Flagged IP for volumetric abuse"
            );
            flagged_this_run.insert(entry.ip_address);
            report.volumetric_flags += 1;
        }

        let hits = self
            .request_log
            .query_window_filtered(since, &self.config.sensitive_paths)
            .await?;

        for record in hits {
            if flagged_this_run.contains(&record.ip_address)
                || self.suspicions.exists(&record.ip_address).await?
            {
                continue;
            }
            let reason = format!("Accessed sensitive path: {}", record.path);
            self.suspicions.insert(&record.ip_address, &reason).await?;
            tracing::warn!(
                ip = %record.ip_address,
                path = %record.path,
                "Flagged IP for sensitive path access"
            );
            flagged_this_run.insert(record.ip_address);
            report.sensitive_path_flags += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewRequestRecord, memory_pool};

    fn record(ip: &str, path: &str) -> NewRequestRecord {
        NewRequestRecord {
            ip_address: ip.to_string(),
            path: path.to_string(),
            method: "GET".to_string(),
            user_agent: None,
            country: None,
            city: None,
        }
    }

    async fn scanner_with(pool: sqlx::SqlitePool, threshold: i64) -> (AnomalyScanner, RequestLogStore, SuspicionStore) {
        let request_log = RequestLogStore::new(pool.clone());
        let suspicions = SuspicionStore::new(pool);
        let scanner = AnomalyScanner::new(
            ScanConfig {
                volumetric_threshold: threshold,
                ..ScanConfig::default()
            },
            request_log.clone(),
            suspicions.clone(),
        );
        (scanner, request_log, suspicions)
    }

    #[tokio::test]
    async fn test_volumetric_rule_flags_busy_ip() {
        let (scanner, request_log, suspicions) = scanner_with(memory_pool().await, 100).await;

        for _ in 0..101 {
            request_log.append(record("9.9.9.9", "/index")).await.unwrap();
        }

        let report = scanner.run_scan().await.unwrap();
        assert_eq!(report.volumetric_flags, 1);

        let entries = suspicions.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip_address, "9.9.9.9");
        assert!(entries[0].reason.contains("101"));
    }

    #[tokio::test]
    async fn test_quiet_ip_is_not_flagged() {
        let (scanner, request_log, suspicions) = scanner_with(memory_pool().await, 100).await;

        for _ in 0..99 {
            request_log.append(record("9.9.9.9", "/index")).await.unwrap();
        }

        scanner.run_scan().await.unwrap();
        assert!(suspicions.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sensitive_path_rule() {
        let (scanner, request_log, suspicions) = scanner_with(memory_pool().await, 100).await;

        request_log.append(record("1.2.3.4", "/admin")).await.unwrap();
        request_log.append(record("5.6.7.8", "/index")).await.unwrap();

        let report = scanner.run_scan().await.unwrap();
        assert_eq!(report.sensitive_path_flags, 1);

        let entries = suspicions.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip_address, "1.2.3.4");
        assert_eq!(entries[0].reason, "Accessed sensitive path: /admin");
    }

    #[tokio::test]
    async fn test_repeat_sensitive_hits_flag_once_per_run() {
        let (scanner, request_log, suspicions) = scanner_with(memory_pool().await, 100).await;

        request_log.append(record("1.2.3.4", "/admin")).await.unwrap();
        request_log.append(record("1.2.3.4", "/login")).await.unwrap();

        scanner.run_scan().await.unwrap();
        assert_eq!(suspicions.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_volumetric_reason_wins_when_both_rules_match() {
        let (scanner, request_log, suspicions) = scanner_with(memory_pool().await, 10).await;

        for _ in 0..11 {
            request_log.append(record("1.2.3.4", "/admin")).await.unwrap();
        }

        scanner.run_scan().await.unwrap();

        let entries = suspicions.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].reason.starts_with("Exceeded"));
    }

    #[tokio::test]
    async fn test_scan_is_idempotent_across_runs() {
        let (scanner, request_log, suspicions) = scanner_with(memory_pool().await, 100).await;

        request_log.append(record("1.2.3.4", "/admin")).await.unwrap();
        for _ in 0..101 {
            request_log.append(record("9.9.9.9", "/index")).await.unwrap();
        }

        let first = scanner.run_scan().await.unwrap();
        assert_eq!(first.volumetric_flags + first.sensitive_path_flags, 2);

        let second = scanner.run_scan().await.unwrap();
        assert_eq!(second.volumetric_flags, 0);
        assert_eq!(second.sensitive_path_flags, 0);
        assert_eq!(suspicions.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_run() {
        let pool = memory_pool().await;
        let (scanner, _, _) = scanner_with(pool.clone(), 100).await;

        pool.close().await;
        assert!(scanner.run_scan().await.is_err());
    }
}
