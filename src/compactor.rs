use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::LocalStore;

/// Rewrite the WAL whenever at least `threshold` events were appended since the
/// last compaction. Returns whether it compacted.
pub async fn compact_if_needed(store: &LocalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            debug!("compacted after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: check the local store every few seconds.
pub async fn run_compactor(store: Arc<LocalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}
