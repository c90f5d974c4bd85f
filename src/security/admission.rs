//! Request admission middleware.
//!
//! Runs on every inbound request, ahead of any application logic:
//! 1. Extract the client IP.
//! 2. Deny with a fixed 403 page if the IP has an active blocklist entry
//!    (no request record is written for denied requests).
//! 3. Otherwise enrich with geolocation, append a request record, and pass
//!    the request through. Failures in this step never fail the request.
//!
//! A failure of the blocklist check itself fails closed unless configured
//! otherwise.

use axum::{
    extract::{ConnectInfo, Request},
    http::{StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::client_ip::ClientIpExtractor;
use crate::geo::GeoResolver;
use crate::store::{BlocklistStore, NewRequestRecord, RequestLogStore};

/// Static denial body. Deliberately carries no per-incident detail.
const DENIAL_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>403 Forbidden</title></head>
<body>
<h1>403 Forbidden</h1>
<p>Your IP address has been blocked from accessing this site.</p>
<p>If you believe this is an error, please contact the site administrator.</p>
</body>
</html>
"#;

#[derive(Debug, Clone)]
pub struct AdmissionGateConfig {
    /// Allow the request through when the blocklist lookup itself fails.
    pub fail_open: bool,
    pub log_events: bool,
}

/// Per-request admission decision unit. Cloned into the middleware closure;
/// holds no cross-request state of its own.
#[derive(Clone)]
pub struct AdmissionGate {
    config: Arc<AdmissionGateConfig>,
    extractor: Arc<ClientIpExtractor>,
    blocklist: BlocklistStore,
    request_log: RequestLogStore,
    geo: Option<GeoResolver>,
}

impl AdmissionGate {
    pub fn new(
        config: AdmissionGateConfig,
        extractor: ClientIpExtractor,
        blocklist: BlocklistStore,
        request_log: RequestLogStore,
        geo: Option<GeoResolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            extractor: Arc::new(extractor),
            blocklist,
            request_log,
            geo,
        }
    }

    /// Middleware function deciding admission for one request.
    pub async fn middleware(&self, req: Request, next: Next) -> Response {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let ip = match self.extractor.extract(req.headers(), peer) {
            Some(ip) => ip,
            None => {
                if self.config.log_events {
                    tracing::warn!("Could not determine client IP, denying request");
                }
                return denial_response();
            }
        };

        match self.blocklist.is_blocked(&ip.to_string()).await {
            Ok(true) => {
                if self.config.log_events {
                    tracing::warn!(ip = %ip, "Request denied: IP is on the blocklist");
                }
                return denial_response();
            }
            Ok(false) => {}
            Err(err) => {
                if self.config.fail_open {
                    tracing::error!(ip = %ip, error = %err, "Blocklist check failed, failing open");
                } else {
                    tracing::error!(ip = %ip, error = %err, "Blocklist check failed, failing closed");
                    return denial_response();
                }
            }
        }

        // Availability beats audit completeness: record, but never let a
        // logging failure take the request down with it. Fields are copied
        // out here because holding `&Request` across an await would make the
        // middleware future non-Send (`Body` is not `Sync`).
        let path = req.uri().path().to_string();
        let method = req.method().to_string();
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        self.record(ip, path, method, user_agent).await;

        next.run(req).await
    }

    async fn record(
        &self,
        ip: IpAddr,
        path: String,
        method: String,
        user_agent: Option<String>,
    ) {
        let geo = match &self.geo {
            Some(resolver) => resolver.resolve(ip).await,
            None => Default::default(),
        };

        let record = NewRequestRecord {
            ip_address: ip.to_string(),
            path,
            method,
            user_agent,
            country: geo.country,
            city: geo.city,
        };

        if let Err(err) = self.request_log.append(record).await {
            tracing::warn!(ip = %ip, error = %err, "Failed to append request record");
        }
    }
}

fn denial_response() -> Response {
    (StatusCode::FORBIDDEN, Html(DENIAL_PAGE)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;
    use axum::body::Body;
    use axum::routing::get;
    use axum::{Router, middleware};
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn test_app(gate: AdmissionGate) -> Router {
        Router::new()
            .route("/", get(ok_handler))
            .route("/about", get(ok_handler))
            .layer(middleware::from_fn(move |req, next| {
                let gate = gate.clone();
                async move { gate.middleware(req, next).await }
            }))
    }

    fn gate_with(
        pool: sqlx::SqlitePool,
        fail_open: bool,
    ) -> (AdmissionGate, BlocklistStore, RequestLogStore) {
        let blocklist = BlocklistStore::new(pool.clone());
        let request_log = RequestLogStore::new(pool);
        let gate = AdmissionGate::new(
            AdmissionGateConfig {
                fail_open,
                log_events: false,
            },
            ClientIpExtractor::new(vec![]),
            blocklist.clone(),
            request_log.clone(),
            None,
        );
        (gate, blocklist, request_log)
    }

    fn request(path: &str, peer: &str) -> Request {
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        Request::builder()
            .uri(path)
            .header("user-agent", "test-agent")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_unblocked_ip_is_admitted_and_logged() {
        let (gate, _, request_log) = gate_with(memory_pool().await, false);
        let app = test_app(gate);

        let response = app.oneshot(request("/about", "198.51.100.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let since = Utc::now() - Duration::hours(1);
        let rows = request_log.query_window(since).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ip_address, "198.51.100.7");
        assert_eq!(rows[0].path, "/about");
        assert_eq!(rows[0].method, "GET");
    }

    #[tokio::test]
    async fn test_blocked_ip_is_denied_without_a_record() {
        let (gate, blocklist, request_log) = gate_with(memory_pool().await, false);
        blocklist.block("203.0.113.5", Some("spam"), None).await.unwrap();
        let app = test_app(gate);

        let response = app.oneshot(request("/", "203.0.113.5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let since = Utc::now() - Duration::hours(1);
        assert!(request_log.query_window(since).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_header_ip_is_checked() {
        let (gate, blocklist, _) = gate_with(memory_pool().await, false);
        blocklist.block("203.0.113.5", None, None).await.unwrap();
        let app = test_app(gate);

        let addr: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let pool = memory_pool().await;
        let (gate, _, _) = gate_with(pool.clone(), false);
        let app = test_app(gate);

        pool.close().await;

        let response = app.oneshot(request("/", "198.51.100.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open_when_configured() {
        let pool = memory_pool().await;
        let (gate, _, _) = gate_with(pool.clone(), true);
        let app = test_app(gate);

        pool.close().await;

        // Blocklist check and record append both fail; the request still
        // goes through.
        let response = app.oneshot(request("/", "198.51.100.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
