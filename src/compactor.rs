use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::WalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Compact when at least `threshold` events were appended since the last
/// rewrite. Returns the live booking count when a compaction ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> Option<usize> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match store.compact().await {
        Ok(live) => {
            info!("compacted WAL after {appends} appends, {live} bookings kept");
            Some(live)
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::BookingRepository;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentdesk_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(resource_id: ResourceId, start: Ms) -> NewBooking {
        NewBooking {
            resource_id,
            renter_id: 1,
            period: Period::new(start, start + 10),
        }
    }

    #[tokio::test]
    async fn below_threshold_is_skipped() {
        let store = WalStore::open(test_wal_path("below.wal")).unwrap();
        store.insert(booking(1, 0)).await.unwrap();
        assert_eq!(compact_if_needed(&store, 5).await, None);
        assert_eq!(store.appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn threshold_triggers_rewrite() {
        let path = test_wal_path("trigger.wal");
        let store = WalStore::open(path.clone()).unwrap();
        for i in 0..6 {
            store.insert(booking(1, i * 100)).await.unwrap();
        }
        store.remove(1).await.unwrap();
        store.remove(2).await.unwrap();

        assert_eq!(compact_if_needed(&store, 8).await, Some(4));
        assert_eq!(store.appends_since_compact().await, 0);

        drop(store);
        let reopened = WalStore::open(path).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 4);
        assert_eq!(reopened.insert(booking(2, 0)).await.unwrap().id, 7);
    }
}
