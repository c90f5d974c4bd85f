//! Client IP extraction.
//!
//! Derives the originating address of a request from proxy forwarding headers
//! or the transport peer. Pure logic, no I/O.

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Resolves the client address behind optional proxy layers.
///
/// Header precedence: first `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the peer address. Forwarding headers are spoofable, so they are only
/// honored when the peer is a configured trusted proxy; an empty proxy list
/// preserves the legacy trust-any-header convention.
#[derive(Debug, Clone)]
pub struct ClientIpExtractor {
    trusted_proxies: Vec<IpNetwork>,
}

impl ClientIpExtractor {
    pub fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { trusted_proxies }
    }

    pub fn extract(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        if self.trusts_headers_from(peer) {
            // X-Forwarded-For can carry a chain; the first entry is the
            // original client by convention.
            if let Some(forwarded_for) = headers.get("x-forwarded-for") {
                if let Ok(value) = forwarded_for.to_str() {
                    if let Some(ip_str) = value.split(',').next() {
                        if let Ok(ip) = ip_str.trim().parse() {
                            return Some(ip);
                        }
                    }
                }
            }

            if let Some(real_ip) = headers.get("x-real-ip") {
                if let Ok(value) = real_ip.to_str() {
                    if let Ok(ip) = value.trim().parse() {
                        return Some(ip);
                    }
                }
            }
        }

        peer
    }

    fn trusts_headers_from(&self, peer: Option<IpAddr>) -> bool {
        if self.trusted_proxies.is_empty() {
            return true;
        }
        match peer {
            Some(ip) => self.trusted_proxies.iter().any(|network| network.contains(ip)),
            None => false,
        }
    }
}
