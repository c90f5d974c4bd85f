//! Geolocation resolution with a TTL cache.
//!
//! Maps client IPs to `{country, city}` via an external HTTP lookup service,
//! caching successes for 24 hours (configurable). Failures degrade to absent
//! values and are never cached, so the next request for the same IP retries
//! the lookup instead of being stuck behind a cached failure.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Resolved location for an IP. Both fields absent when the lookup failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("geolocation service returned status '{0}' for {1}")]
    Unresolved(String, IpAddr),
}

/// External lookup collaborator. Swapped out for a counting mock in tests.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, GeoError>;
}

/// ip-api.com-style JSON lookup over HTTP, bounded by a client-wide timeout.
pub struct HttpGeoLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGeoLookup {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[derive(Deserialize)]
struct GeoPayload {
    status: Option<String>,
    country: Option<String>,
    city: Option<String>,
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), ip);
        let payload: GeoPayload = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(status) = payload.status.as_deref() {
            if status != "success" {
                return Err(GeoError::Unresolved(status.to_string(), ip));
            }
        }

        Ok(GeoInfo {
            country: payload.country,
            city: payload.city,
        })
    }
}

#[derive(Clone)]
struct CachedGeo {
    info: GeoInfo,
    cached_at: Instant,
}

impl CachedGeo {
    fn new(info: GeoInfo) -> Self {
        Self {
            info,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Shared, concurrently-accessed cache in front of a [`GeoLookup`].
///
/// Two simultaneous misses for the same IP may both call the collaborator;
/// the duplicate call is an efficiency loss, not a correctness problem, and
/// the last write wins.
#[derive(Clone)]
pub struct GeoResolver {
    lookup: Arc<dyn GeoLookup>,
    cache: Arc<DashMap<IpAddr, CachedGeo>>,
    ttl: Duration,
}

impl GeoResolver {
    pub fn new(lookup: Arc<dyn GeoLookup>, ttl: Duration) -> Self {
        Self {
            lookup,
            cache: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Resolve an IP, preferring an unexpired cache entry.
    ///
    /// Never fails: lookup errors degrade to an empty [`GeoInfo`].
    pub async fn resolve(&self, ip: IpAddr) -> GeoInfo {
        if let Some(entry) = self.cache.get(&ip) {
            if !entry.is_expired(self.ttl) {
                return entry.info.clone();
            }
        }

        match self.lookup.lookup(ip).await {
            Ok(info) => {
                self.cache.insert(ip, CachedGeo::new(info.clone()));
                info
            }
            Err(err) => {
                tracing::warn!(ip = %ip, error = %err, "Geolocation lookup failed");
                GeoInfo::default()
            }
        }
    }

    /// Drop expired entries (called periodically).
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.cache.retain(|_, entry| !entry.is_expired(ttl));
    }
}
