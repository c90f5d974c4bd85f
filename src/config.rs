//! Configuration file parsing for the gatekeeper.
//!
//! This module handles loading and parsing the `config.toml` file for the
//! admission pipeline, geolocation enrichment, the anomaly scanner, and the
//! login rate limit.
//!
//! Configuration is optional; every section defaults to the behavior of the
//! system the gatekeeper was built to replace.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete gatekeeper configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub admission: AdmissionConfig,
    pub geolocation: GeolocationConfig,
    pub scanner: ScannerConfig,
    pub login: LoginConfig,
    pub database: DatabaseConfig,
    pub request: RequestConfig,
    pub security: SecurityConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionConfig::default(),
            geolocation: GeolocationConfig::default(),
            scanner: ScannerConfig::default(),
            login: LoginConfig::default(),
            database: DatabaseConfig::default(),
            request: RequestConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl GatekeeperConfig {
    /// Load configuration from a TOML file.
    ///
    /// If the file doesn't exist, returns the default configuration.
    /// If the file exists but is malformed, returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variable CONFIG_FILE or default path.
    ///
    /// `DATABASE_URL` overrides the configured store location when set.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::from_file(config_path)?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        Ok(config)
    }
}

/// Admission pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Allow requests through when the blocklist check itself fails.
    /// Default is false: a gatekeeper that fails open under store pressure
    /// can be bypassed by inducing that pressure.
    pub fail_open: bool,
    /// Upstream proxies whose forwarding headers are trusted. Empty list
    /// means forwarding headers are trusted from any peer.
    #[serde(with = "ip_list_serde")]
    pub trusted_proxies: Vec<IpNetwork>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            fail_open: false,
            trusted_proxies: vec![],
        }
    }
}

/// Geolocation enrichment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// Enable country/city enrichment of request records.
    pub enabled: bool,
    /// Lookup endpoint; the client IP is appended as a path segment.
    pub endpoint: String,
    /// How long a successful lookup is cached (default 24 hours).
    pub cache_ttl_seconds: u64,
    /// Upper bound on a single external lookup.
    pub lookup_timeout_seconds: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://ip-api.com/json".to_string(),
            cache_ttl_seconds: 86_400, // 24 hours
            lookup_timeout_seconds: 5,
        }
    }
}

impl GeolocationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_seconds)
    }
}

/// Anomaly scanner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Enable the periodic scan.
    pub enabled: bool,
    /// Seconds between scheduled runs.
    pub interval_seconds: u64,
    /// Trailing window each run aggregates over.
    pub window_seconds: u64,
    /// Requests per window at which an IP is flagged.
    pub volumetric_threshold: i64,
    /// Paths whose mere access flags the requesting IP.
    pub sensitive_paths: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            window_seconds: 3600,
            volumetric_threshold: 100,
            sensitive_paths: vec!["/admin".to_string(), "/login".to_string()],
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Login endpoint rate limit (consumed at the endpoint boundary).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Per-IP login attempts allowed per minute.
    pub attempts_per_minute: u32,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            attempts_per_minute: 5,
        }
    }
}

/// Durable store location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://gatekeeper.db".to_string(),
        }
    }
}

/// Request validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Maximum request body size in bytes (default 1MB).
    pub max_body_size_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_body_size_bytes: 1_048_576, // 1MB
        }
    }
}

/// Security-related configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Log security-related events (denials, failed admin auth, etc).
    pub log_security_events: bool,
    /// Interval for evicting expired geolocation cache entries (in seconds).
    pub cleanup_interval_seconds: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            log_security_events: true,
            cleanup_interval_seconds: 300, // 5 minutes
        }
    }
}

/// Custom serde module for IP network lists.
mod ip_list_serde {
    use ipnetwork::IpNetwork;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(ips: &Vec<IpNetwork>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let strings: Vec<String> = ips.iter().map(|ip| ip.to_string()).collect();
        serializer.collect_seq(strings)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<IpNetwork>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings: Vec<String> = Vec::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| IpNetwork::from_str(&s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatekeeperConfig::default();
        assert!(!config.admission.fail_open);
        assert!(config.admission.trusted_proxies.is_empty());
        assert_eq!(config.geolocation.cache_ttl_seconds, 86_400);
        assert_eq!(config.scanner.volumetric_threshold, 100);
        assert_eq!(
            config.scanner.sensitive_paths,
            vec!["/admin".to_string(), "/login".to_string()]
        );
        assert_eq!(config.login.attempts_per_minute, 5);
    }

    #[test]
    fn test_parse_trusted_proxies() {
        let config_str = r#"
[admission]
fail_open = true
trusted_proxies = ["10.0.0.0/8", "192.168.1.1"]
"#;

        let config: GatekeeperConfig = toml::from_str(config_str).unwrap();
        assert!(config.admission.fail_open);
        assert_eq!(config.admission.trusted_proxies.len(), 2);
    }

    #[test]
    fn test_parse_scanner_overrides() {
        let config_str = r#"
[scanner]
window_seconds = 1800
volumetric_threshold = 50
sensitive_paths = ["/admin", "/login", "/wp-admin"]
"#;

        let config: GatekeeperConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.scanner.window_seconds, 1800);
        assert_eq!(config.scanner.volumetric_threshold, 50);
        assert_eq!(config.scanner.sensitive_paths.len(), 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.scanner.interval_seconds, 3600);
        assert!(config.geolocation.enabled);
    }
}
