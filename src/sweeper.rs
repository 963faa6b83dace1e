/// Expired refresh-token cleanup
///
/// Runs beside the HTTP server, never inside a request. Failures are logged
/// and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::repository::RefreshTokenRepository;

/// Delete expired refresh records once; returns how many were removed
pub async fn sweep_once<R>(repository: &R) -> u64
where
    R: RefreshTokenRepository + ?Sized,
{
    match repository.delete_expired_refresh_records().await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(deleted, "Swept expired refresh tokens");
            }
            deleted
        }
        Err(e) => {
            tracing::error!(error = %e, "Refresh token sweep failed");
            0
        }
    }
}

/// Spawn the periodic sweep; `None` when the interval is 0
pub fn spawn_sweeper<R>(repository: Arc<R>, interval_seconds: u64) -> Option<JoinHandle<()>>
where
    R: RefreshTokenRepository + ?Sized + 'static,
{
    if interval_seconds == 0 {
        tracing::info!("Refresh token sweeper disabled");
        return None;
    }

    let period = Duration::from_secs(interval_seconds);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            sweep_once(repository.as_ref()).await;
        }
    }))
}
