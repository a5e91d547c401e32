use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::Store;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a property's WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(store: &Store, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(property = %store.property_id(), appends, threshold, "compaction not due");
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!(property = %store.property_id(), error = %e, "WAL compaction failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Policy;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn venue(id: &str) -> BookableResource {
        BookableResource::new(
            ResourceKey::Venue {
                property_id: "p1".into(),
                venue_id: id.into(),
            },
            Some(10_000.0),
        )
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = Store::open(path.clone(), "p1", Policy::default()).unwrap();
        for i in 0..5 {
            store.put_resource(venue(&format!("hall{i}"))).await.unwrap();
        }

        assert!(!compact_if_due(&store, 10).await);
        assert_eq!(store.wal_appends_since_compact().await, 5);

        // Overwrites collapse to one event per resource.
        for _ in 0..5 {
            store.put_resource(venue("hall0")).await.unwrap();
        }
        assert!(compact_if_due(&store, 10).await);
        assert_eq!(store.wal_appends_since_compact().await, 0);
        drop(store);

        let reopened = Store::open(path, "p1", Policy::default()).unwrap();
        assert_eq!(reopened.list_resources().await.len(), 5);
    }
}
