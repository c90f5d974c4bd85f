use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::client_ip::ClientIpExtractor;
use crate::config::GatekeeperConfig;
use crate::geo::{GeoResolver, HttpGeoLookup};
use crate::handlers::AppState;
use crate::scanner::{AnomalyScanner, ScanConfig};
use crate::security::{AdminAuth, AdmissionGate, LoginRateLimiter};
use crate::security::admission::AdmissionGateConfig;
use crate::sig_down::SigDown;

mod client_ip;
mod config;
mod error;
mod geo;
mod handlers;
mod scanner;
mod security;
mod sig_down;
mod store;
mod telemetry;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = match GatekeeperConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load configuration, using defaults");
            GatekeeperConfig::default()
        }
    };

    let pool = match store::connect(&config.database.url).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(url = %config.database.url, error = %err, "Failed to open the durable store");
            std::process::exit(1);
        }
    };

    let blocklist = store::BlocklistStore::new(pool.clone());
    let request_log = store::RequestLogStore::new(pool.clone());
    let suspicions = store::SuspicionStore::new(pool.clone());

    let geo = if config.geolocation.enabled {
        match HttpGeoLookup::new(
            config.geolocation.endpoint.clone(),
            config.geolocation.lookup_timeout(),
        ) {
            Ok(lookup) => Some(GeoResolver::new(
                Arc::new(lookup),
                config.geolocation.cache_ttl(),
            )),
            Err(err) => {
                tracing::warn!(error = %err, "Geolocation client unavailable, enrichment disabled");
                None
            }
        }
    } else {
        tracing::info!("Geolocation enrichment disabled by configuration");
        None
    };

    let admission = AdmissionGate::new(
        AdmissionGateConfig {
            fail_open: config.admission.fail_open,
            log_events: config.security.log_security_events,
        },
        ClientIpExtractor::new(config.admission.trusted_proxies.clone()),
        blocklist.clone(),
        request_log.clone(),
        geo.clone(),
    );

    let scanner = AnomalyScanner::new(
        ScanConfig {
            window: config.scanner.window(),
            volumetric_threshold: config.scanner.volumetric_threshold,
            sensitive_paths: config.scanner.sensitive_paths.clone(),
        },
        request_log.clone(),
        suspicions.clone(),
    );

    let admin_auth = AdminAuth::from_env();
    let login_limiter = LoginRateLimiter::new(config.login.attempts_per_minute);

    let sig_down = match SigDown::try_new() {
        Ok(sig_down) => sig_down,
        Err(err) => {
            tracing::error!(error = %err, "Failed to install signal handlers");
            std::process::exit(1);
        }
    };

    if config.scanner.enabled {
        spawn_scan_scheduler(
            scanner.clone(),
            config.scanner.interval(),
            sig_down.cancellation_token(),
        );
    } else {
        tracing::info!("Anomaly scanner disabled by configuration");
    }

    if let Some(geo) = geo {
        spawn_cache_eviction(
            geo,
            Duration::from_secs(config.security.cleanup_interval_seconds),
            sig_down.cancellation_token(),
        );
    }

    let state = AppState {
        blocklist,
        request_log,
        suspicions,
        scanner,
        login_limiter,
        pool,
    };

    let admin = handlers::admin_routes().layer(axum::middleware::from_fn(move |req, next| {
        let auth = admin_auth.clone();
        async move { auth.middleware(req, next).await }
    }));

    let app = Router::new()
        .merge(handlers::routes())
        .merge(admin)
        .with_state(state)
        .layer(axum::middleware::from_fn(move |req, next| {
            let gate = admission.clone();
            async move { gate.middleware(req, next).await }
        }))
        .layer(RequestBodyLimitLayer::new(config.request.max_body_size_bytes))
        .layer(TraceLayer::new_for_http());

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{host}:{port}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr = %addr, error = %err, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %addr, "Gatekeeper listening");

    let token = sig_down.cancellation_token();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { token.cancelled().await });

    if let Err(err) = served.await {
        tracing::error!(error = %err, "Server error");
        std::process::exit(1);
    }

    tracing::info!("Gatekeeper shut down");
}

/// Run the anomaly scanner on a fixed cadence until shutdown.
///
/// A failed run is logged and retried at the next tick, never immediately.
fn spawn_scan_scheduler(scanner: AnomalyScanner, period: Duration, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; consume it so the
        // first scan lands one full period after startup.
        ticker.tick().await;

        tracing::info!(period_seconds = period.as_secs(), "Anomaly scan scheduler started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Anomaly scan scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match scanner.run_scan().await {
                        Ok(report) => {
                            tracing::info!(
                                window_ips = report.window_ips,
                                volumetric = report.volumetric_flags,
                                sensitive = report.sensitive_path_flags,
                                "Anomaly scan complete"
                            );
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Anomaly scan failed, will retry at next interval");
                        }
                    }
                }
            }
        }
    });
}

/// Periodically drop expired geolocation cache entries.
fn spawn_cache_eviction(geo: GeoResolver, period: Duration, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => geo.evict_expired(),
            }
        }
    });
}
