use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use legalrelay_database::ThreadCorrelationStore;

use crate::reply_router::EmailReplyRouter;

/// Runs a reply poll every `interval`, purging stale correlations first.
pub fn spawn_reply_poller(
    router: Arc<EmailReplyRouter>,
    correlations: Arc<dyn ThreadCorrelationStore>,
    interval: Duration,
    correlation_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_seconds = interval.as_secs(), "Email reply poller started");

        loop {
            ticker.tick().await;

            if let Ok(ttl) = chrono::Duration::from_std(correlation_ttl) {
                match correlations.purge_older_than(Utc::now() - ttl).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged = purged, "Purged expired thread correlations"),
                    Err(err) => tracing::warn!(error = %err, "Failed to purge thread correlations"),
                }
            }

            if let Err(err) = router.poll_and_relay().await {
                tracing::error!(error = %format!("{:#}", err), "Email poll failed");
            }
        }
    })
}
