//! Shutdown signal plumbing.
//!
//! Translates SIGINT/SIGTERM into a [`CancellationToken`] shared by the Axum
//! server and the background tasks (anomaly scan scheduler, cache eviction).

use tokio_util::sync::CancellationToken;

pub struct SigDown {
    token: CancellationToken,
}

impl SigDown {
    pub fn try_new() -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let trigger = token.clone();

        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::spawn(async move {
            #[cfg(unix)]
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            #[cfg(not(unix))]
            let _ = tokio::signal::ctrl_c().await;

            tracing::info!("Shutdown signal received");
            trigger.cancel();
        });

        Ok(Self { token })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
