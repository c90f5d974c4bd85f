//! Tracing subscriber setup.
//!
//! Log verbosity is controlled by `RUST_LOG`; the default keeps the gatekeeper
//! at `info` so admission decisions and scanner summaries are visible without
//! per-request noise.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
