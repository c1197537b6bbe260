//! `Runtime` bundles every piece of process-wide mutable state behind one
//! value passed into each top-level operation (spec §9 design notes): the
//! process singleton / block registry / crawl-lock map / active-downloads
//! map all live here instead of as free-floating module globals.

use crate::block::BlockRegistry;
use crate::store::Store;
use crate::tracker::DownloadTracker;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct Runtime {
    pub(crate) store: Store,
    pub(crate) blocks: BlockRegistry,
    pub(crate) tracker: DownloadTracker,
    /// One channel name cannot crawl twice simultaneously (spec §5).
    crawl_locks: DashSet<String>,
    /// Serializes "remove new-video URL → maybe clear notify flag" per
    /// channel (spec §5) against a concurrent crawler insert.
    new_video_mutexes: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
    /// Cancelled on OS signal or fatal error; every suspended operation
    /// observes it (spec §5).
    pub(crate) cancel: CancellationToken,
}

impl Runtime {
    pub(crate) fn new(store: Store, blocks: BlockRegistry, tracker: DownloadTracker) -> Self {
        Runtime {
            store,
            blocks,
            tracker,
            crawl_locks: DashSet::new(),
            new_video_mutexes: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attempts to acquire the named crawl lock; `true` on success, `false`
    /// if another task already holds it.
    pub(crate) fn try_acquire_crawl_lock(&self, channel_name: &str) -> bool {
        self.crawl_locks.insert(channel_name.to_string())
    }

    pub(crate) fn release_crawl_lock(&self, channel_name: &str) {
        self.crawl_locks.remove(channel_name);
    }

    /// `true` iff at least one channel crawl is still holding its lock.
    pub(crate) fn has_in_flight_crawls(&self) -> bool {
        !self.crawl_locks.is_empty()
    }

    pub(crate) fn new_video_mutex(&self, channel_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.new_video_mutexes
            .entry(channel_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn runtime() -> Runtime {
        let store = Store::open(":memory:").await.expect("open store");
        let blocks = BlockRegistry::new(store.clone(), HashMap::new());
        let tracker = DownloadTracker::new(store.clone());
        Runtime::new(store, blocks, tracker)
    }

    #[tokio::test]
    async fn crawl_lock_is_exclusive() {
        let rt = runtime().await;
        assert!(rt.try_acquire_crawl_lock("chan"));
        assert!(!rt.try_acquire_crawl_lock("chan"));
        rt.release_crawl_lock("chan");
        assert!(rt.try_acquire_crawl_lock("chan"));
    }
}
