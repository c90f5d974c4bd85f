//! Security middleware and utilities for the gatekeeper.
//!
//! This module provides:
//! - The per-request admission gate (blocklist check + request logging)
//! - Admin API key authentication
//! - The per-IP login rate limit consumed at the endpoint boundary

pub mod admin_auth;
pub mod admission;
pub mod login_limit;

pub use admin_auth::AdminAuth;
pub use admission::AdmissionGate;
pub use login_limit::LoginRateLimiter;
