use std::future::Future;
use std::time::Duration;

use diesel::SqliteConnection;

use crate::errors;
use crate::sessions;

/// How often a running server purges expired sessions.
pub const CLEANUP_PERIOD: Duration = Duration::from_secs(60 * 60);

/// checks the DB for expired sessions and delete them. Expired sessions
/// already never resolve, this only keeps the table from growing forever.
pub fn cleanup_once(conn: &mut SqliteConnection) -> errors::Result<usize> {
    log::debug!("cleaning up sessions");
    let n = sessions::delete_expired(conn, sessions::now())?;
    log::info!("deleted a total of {n} expired sessions");
    Ok(n)
}

/// Runs `purge` right away then every `period`, forever. A failed run is
/// logged and retried on the next tick.
pub async fn purge_periodically<F, Fut>(period: Duration, mut purge: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = errors::Result<usize>>,
{
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(err) = purge().await {
            log::error!("session cleanup failed: {err:?}");
        }
    }
}
