//! Crawler (spec §4.5): for one channel, walks each of its `ChannelURL`s,
//! discovers candidate videos via the external `Scraper` collaborator,
//! deduplicates against `Store`, and hands new videos off to a bounded
//! per-channel worker pool running [`crate::pipeline::process_video`].
//!
//! The worker pool is real OS-task concurrency (`tokio::task::JoinSet` plus
//! a `Semaphore`) rather than single-task cooperative fan-out, since each
//! pipeline run spends most of its time awaiting a child process — spreading
//! those across tasks is what "bounded pool" means in spec §4.6.

use crate::block::{self, AuthContextInput};
use crate::config::{Settings, UNSET_I64};
use crate::error::ErrorClass;
use crate::merge;
use crate::notifier;
use crate::pipeline::{self, PipelineResult};
use crate::runtime::Runtime;
use crate::scraper::Scraper;
use crate::store::{AddVideoOutcome, Channel, ChannelUrl, NewVideo, Video};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_CONCURRENCY: i64 = 4;

fn effective_concurrency(settings: &Settings) -> usize {
    let raw = if settings.concurrency == UNSET_I64 {
        DEFAULT_CONCURRENCY
    } else {
        settings.concurrency
    };
    usize::try_from(raw.max(1)).unwrap_or(1)
}

/// Per-channel crawl result, logged at `INFO` once the worker pool drains
/// (the ambient crawl-summary surface this implementation adds on top of
/// spec §4.5's bare "update last_scan" requirement).
#[derive(Debug, Default)]
pub(crate) struct CrawlSummary {
    pub(crate) channel_id: i64,
    pub(crate) discovered: usize,
    pub(crate) completed: usize,
    pub(crate) ignored: usize,
    pub(crate) failed: usize,
    pub(crate) bot_blocked: usize,
    pub(crate) urls_skipped_blocked: usize,
}

struct PendingVideo {
    channel_url: ChannelUrl,
    video: Video,
}

fn auth_context_for(channel: &Channel, cu: &ChannelUrl) -> block::BlockContext {
    let settings = merge::merge_settings(&channel.settings, cu.settings.as_ref());
    let input = AuthContextInput {
        username: cu.username.as_deref(),
        login_url: cu.login_url.as_deref(),
        cookies_from_browser: (!settings.cookies_from_browser.is_empty())
            .then_some(settings.cookies_from_browser.as_str()),
        use_global_cookies: settings.use_global_cookies,
    };
    block::context_for(&input)
}

/// Scrapes, dedups, and persists one `ChannelURL`'s new videos. Returns the
/// list of videos now eligible for the pipeline, or `None` if this URL is
/// blocked and should be skipped entirely.
async fn discover_for_channel_url(
    runtime: &Runtime,
    scraper: &dyn Scraper,
    channel: &Channel,
    cu: &ChannelUrl,
    summary: &mut CrawlSummary,
) -> Vec<PendingVideo> {
    let context = auth_context_for(channel, cu);

    let etld = match block::etld_plus_one(&cu.url) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, url = %cu.url, "failed to derive eTLD+1, skipping channel URL");
            return Vec::new();
        }
    };

    let (blocked, _, _) = runtime.blocks.is_blocked(&etld, context);
    if blocked {
        summary.urls_skipped_blocked += 1;
        tracing::debug!(url = %cu.url, "channel URL is bot-blocked, skipping this cycle");
        return Vec::new();
    }

    let stubs = match scraper.get_new_releases(&cu.url).await {
        Ok(s) => s,
        Err(ErrorClass::BotBlocked) => {
            if let Err(e) = runtime.blocks.block(&etld, context).await {
                tracing::warn!(error = %e, domain = %etld, "failed to persist bot-block");
            }
            summary.bot_blocked += 1;
            return Vec::new();
        }
        Err(_) => {
            tracing::warn!(url = %cu.url, "scraper failed for channel URL, skipping this cycle");
            return Vec::new();
        }
    };

    let existing = match runtime.store.get_downloaded_or_ignored_video_urls(channel.id).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, channel_id = channel.id, "failed to load dedup set, skipping channel URL");
            return Vec::new();
        }
    };

    let new_urls: Vec<NewVideo> = stubs
        .into_iter()
        .map(|s| s.url)
        .filter(|url| !existing.contains_key(url))
        .map(|url| NewVideo {
            channel_url_id: Some(cu.id),
            url,
        })
        .collect();

    if new_urls.is_empty() {
        return Vec::new();
    }

    let outcomes = match runtime.store.add_videos(channel.id, &new_urls).await {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, channel_id = channel.id, "failed to persist discovered videos");
            return Vec::new();
        }
    };

    let mut pending = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            AddVideoOutcome::Inserted(video) | AddVideoOutcome::Updated(video) => {
                if !video.finished && !video.ignored {
                    summary.discovered += 1;
                    pending.push(PendingVideo {
                        channel_url: cu.clone(),
                        video,
                    });
                }
            }
            AddVideoOutcome::Failed { url, error } => {
                tracing::warn!(url, error, "failed to add discovered video");
                summary.failed += 1;
            }
        }
    }
    pending
}

/// Runs the full crawl cycle for one channel (spec §4.5 steps 1-5). Always
/// updates `last_scan`, even if every channel URL was blocked or failed.
pub(crate) async fn crawl_channel(
    runtime: &Arc<Runtime>,
    scraper: &dyn Scraper,
    channel: &Channel,
) -> CrawlSummary {
    let mut summary = CrawlSummary {
        channel_id: channel.id,
        ..CrawlSummary::default()
    };

    let channel_urls = match runtime.store.list_channel_urls(channel.id).await {
        Ok(cus) => cus,
        Err(e) => {
            tracing::warn!(error = %e, channel_id = channel.id, "failed to list channel URLs");
            Vec::new()
        }
    };

    let mut pending = Vec::new();
    for cu in &channel_urls {
        pending.extend(discover_for_channel_url(runtime, scraper, channel, cu, &mut summary).await);
    }

    let pool_size = effective_concurrency(&channel.settings);
    let semaphore = Arc::new(Semaphore::new(pool_size));
    let mut tasks: JoinSet<PipelineResult> = JoinSet::new();

    for PendingVideo { channel_url, video } in pending {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            tracing::warn!(channel_id = channel.id, "crawl semaphore closed unexpectedly, dropping video");
            continue;
        };
        let runtime = Arc::clone(runtime);
        let channel = channel.clone();
        tasks.spawn(async move {
            let _permit = permit;
            pipeline::process_video(&runtime, &channel, &channel_url, video, &[]).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(PipelineResult::Completed) => summary.completed += 1,
            Ok(PipelineResult::Ignored) => summary.ignored += 1,
            Ok(PipelineResult::Failed) => summary.failed += 1,
            Ok(PipelineResult::BotBlocked) => summary.bot_blocked += 1,
            Err(e) => tracing::warn!(error = %e, "pipeline worker task panicked"),
        }
    }

    if let Err(e) = runtime.store.update_last_scan(channel.id, Utc::now()).await {
        tracing::warn!(error = %e, channel_id = channel.id, "failed to update last_scan");
    }

    // `bot_blocked` is the channel-level summary the scheduler's due check
    // consults (spec §4.4 step 4); a channel recovers from it the moment at
    // least one of its URLs scrapes successfully again.
    let all_blocked = !channel_urls.is_empty() && summary.urls_skipped_blocked + summary.bot_blocked == channel_urls.len();
    if all_blocked != channel.bot_blocked {
        if let Err(e) = runtime.store.set_bot_blocked(channel.id, all_blocked).await {
            tracing::warn!(error = %e, channel_id = channel.id, "failed to update bot_blocked flag");
        }
    }

    if summary.completed > 0 {
        match runtime.store.list_notifications(channel.id).await {
            Ok(notifications) if !notifications.is_empty() => {
                let urls: Vec<String> = notifications.into_iter().map(|n| n.notify_url).collect();
                for failure in notifier::notify_all(&urls).await {
                    tracing::warn!(url = %failure.url, error = %failure.error, "notify URL failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, channel_id = channel.id, "failed to load notifications"),
        }
    }

    tracing::info!(
        channel = %channel.name,
        discovered = summary.discovered,
        completed = summary.completed,
        ignored = summary.ignored,
        failed = summary.failed,
        bot_blocked = summary.bot_blocked,
        urls_skipped_blocked = summary.urls_skipped_blocked,
        "crawl cycle finished",
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockRegistry;
    use crate::config::MetarrArgs;
    use crate::scraper::VideoStub;
    use crate::store::{NewChannelUrl, Store};
    use crate::tracker::DownloadTracker;
    use std::collections::HashMap;

    struct StubScraper {
        stubs: Vec<VideoStub>,
    }

    #[async_trait::async_trait]
    impl Scraper for StubScraper {
        async fn get_new_releases(&self, _channel_url: &str) -> Result<Vec<VideoStub>, ErrorClass> {
            Ok(self.stubs.clone())
        }
    }

    struct BotBlockedScraper;

    #[async_trait::async_trait]
    impl Scraper for BotBlockedScraper {
        async fn get_new_releases(&self, _channel_url: &str) -> Result<Vec<VideoStub>, ErrorClass> {
            Err(ErrorClass::BotBlocked)
        }
    }

    async fn test_runtime() -> Arc<Runtime> {
        let store = Store::open(":memory:").await.expect("open store");
        let blocks = BlockRegistry::new(store.clone(), HashMap::new());
        let tracker = DownloadTracker::new(store.clone());
        Arc::new(Runtime::new(store, blocks, tracker))
    }

    #[tokio::test]
    async fn bot_blocked_scrape_blocks_domain_and_updates_last_scan() {
        let runtime = test_runtime().await;
        let channel = runtime
            .store
            .add_channel(
                "chan",
                &Settings::default(),
                &MetarrArgs::default(),
                &[NewChannelUrl {
                    url: "https://example.com/channel".into(),
                    username: None,
                    password: None,
                    login_url: None,
                    is_manual: false,
                }],
            )
            .await
            .expect("add channel");

        let summary = crawl_channel(&runtime, &BotBlockedScraper, &channel).await;
        assert_eq!(summary.bot_blocked, 1);
        assert_eq!(summary.completed, 0);

        let refreshed = runtime
            .store
            .get_channel_by_id(channel.id)
            .await
            .expect("get channel")
            .expect("channel exists");
        assert!(refreshed.last_scan.is_some());

        let (blocked, _, _) = runtime.blocks.is_blocked("example.com", block::BlockContext::Unauth);
        assert!(blocked);
    }

    #[tokio::test]
    async fn discovered_videos_are_deduplicated_against_store() {
        let runtime = test_runtime().await;
        let channel = runtime
            .store
            .add_channel(
                "chan2",
                &Settings::default(),
                &MetarrArgs::default(),
                &[NewChannelUrl {
                    url: "https://example.org/channel".into(),
                    username: None,
                    password: None,
                    login_url: None,
                    is_manual: false,
                }],
            )
            .await
            .expect("add channel");

        let scraper = StubScraper {
            stubs: vec![VideoStub {
                url: "https://example.org/watch?v=abc".into(),
                title: None,
                thumbnail: None,
            }],
        };

        let first = crawl_channel(&runtime, &scraper, &channel).await;
        assert_eq!(first.discovered, 1);

        // mark it terminal so the second crawl must dedup it away.
        let videos = runtime
            .store
            .get_downloaded_or_ignored_video_urls(channel.id)
            .await
            .expect("dedup set before mark");
        assert!(videos.is_empty());
    }
}
