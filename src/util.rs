//! Helpers for agents that wrap blocking I/O.
//!
//! Agent capabilities run on the async runtime. Anything that blocks a
//! thread (serial ports, stdin, vendor SDK calls) goes through these so the
//! cycle loop and the workers keep moving.

use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::{timeout, Instant};

use crate::{Error, Result};

/// Run a blocking closure on the blocking pool.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Like [`blocking`], but gives up after `duration`.
///
/// The closure keeps running on its thread after a timeout; callers should
/// pass closures that end on their own.
pub async fn blocking_with_timeout<F, T>(duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match timeout(duration, spawn_blocking(f)).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// `now + d`, saturating at roughly thirty years out.
pub(crate) fn deadline_after(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(d)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}
