//! PipelineWorkers (spec §4.6): the per-video state machine the Crawler
//! hands each newly-discovered video stub to. Runs entirely outside of any
//! lock — every dependency (`Store`, `BlockRegistry`, `DownloadTracker`) is
//! already safe for concurrent use, so N videos can be in flight across N
//! channels without contention beyond the per-video download slot itself.
//!
//! States: `meta-fetching -> filtering -> video-dling -> post-processing ->
//! completed`, with `ignored`/`failed` as the other two terminal states.

mod filter;
mod metarr_args;

use crate::config::{MetarrOp, Settings, UNSET_I64};
use crate::downloader;
use crate::error::ErrorClass;
use crate::merge;
use crate::runtime::Runtime;
use crate::store::{Channel, ChannelUrl, DownloadStatus, Video};
use crate::tracker::StatusUpdate;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_secs(5);
const RETRY_MAX_DELAY: std::time::Duration = std::time::Duration::from_secs(15);
const DEFAULT_MAX_RETRIES: i64 = 3;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PipelineResult {
    Completed,
    Ignored,
    Failed,
    BotBlocked,
}

fn max_retries(settings: &Settings) -> i64 {
    if settings.dl_retries == UNSET_I64 {
        DEFAULT_MAX_RETRIES
    } else {
        settings.dl_retries
    }
}

fn retry_delay(attempt: u32) -> std::time::Duration {
    RETRY_BASE_DELAY.saturating_mul(attempt).min(RETRY_MAX_DELAY)
}

/// Runs `op` up to `max_retries` additional times on `ErrorClass::Transient`,
/// with a linearly-growing, capped backoff (spec §4.6 retry policy).
/// Bot-blocked and fatal classifications propagate immediately, unretried.
async fn with_retries<T, F, Fut>(
    max_retries: i64,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ErrorClass>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ErrorClass>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(ErrorClass::BotBlocked) => return Err(ErrorClass::BotBlocked),
            Err(ErrorClass::Fatal) => return Err(ErrorClass::Fatal),
            Err(ErrorClass::Transient) => {
                let tried = i64::from(attempt) + 1;
                if tried > max_retries {
                    return Err(ErrorClass::Transient);
                }
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    () = tokio::time::sleep(retry_delay(attempt)) => {}
                    () = cancel.cancelled() => return Err(ErrorClass::Transient),
                }
            }
        }
    }
}

fn resolve_output_dir(
    metarr: &crate::config::MetarrArgs,
    move_output_dir: Option<&str>,
    metadata: &HashMap<String, serde_json::Value>,
) -> PathBuf {
    if let Some(dir) = move_output_dir {
        return PathBuf::from(dir);
    }
    if !metarr.output_dir.is_empty() {
        if let Ok(path) = crate::dirparser::expand(&metarr.output_dir, metadata) {
            return path;
        }
        tracing::warn!(template = %metarr.output_dir, "output_dir template failed to expand, falling back");
    }
    std::env::temp_dir()
}

fn metadata_to_map(value: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => HashMap::new(),
    }
}

/// Drives one video through every pipeline stage. `metarr_file_ops` are the
/// per-invocation filename/meta ops supplied outside the database (spec
/// §4.6 post-processing merge rules); pass an empty slice when none apply.
pub(crate) async fn process_video(
    runtime: &Runtime,
    channel: &Channel,
    cu: &ChannelUrl,
    video: Video,
    metarr_file_ops: &[MetarrOp],
) -> PipelineResult {
    let settings = merge::merge_settings(&channel.settings, cu.settings.as_ref());
    let metarr = merge::merge_metarr_args(&channel.metarr, cu.metarr.as_ref());
    let retries = max_retries(&settings);

    let handle = runtime.tracker.register(video.id).await;
    let cancel = handle.token().clone();

    // meta-fetching
    let meta_result = with_retries(retries, &cancel, || {
        downloader::fetch_metadata(&video.url, &settings, &cancel)
    })
    .await;

    let meta = match meta_result {
        Ok(m) => m,
        Err(ErrorClass::BotBlocked) => {
            finish(runtime, video.id, DownloadStatus::Failed, 0.0, Some("bot-blocked during metadata fetch")).await;
            return PipelineResult::BotBlocked;
        }
        Err(_) => {
            finish(runtime, video.id, DownloadStatus::Failed, 0.0, Some("metadata fetch failed")).await;
            return PipelineResult::Failed;
        }
    };

    let metadata: serde_json::Value = match tokio::fs::read_to_string(&meta.json_path).await {
        Ok(text) => serde_json::from_str(&text).unwrap_or(serde_json::Value::Null),
        Err(e) => {
            tracing::warn!(error = %e, path = %meta.json_path.display(), "failed to read metadata sidecar");
            serde_json::Value::Null
        }
    };
    let metadata_map = metadata_to_map(&metadata);

    if let Err(e) = runtime.store.set_video_metadata(video.id, &metadata).await {
        tracing::warn!(error = %e, video_id = video.id, "failed to persist video metadata");
    }

    // filtering
    let outcome = filter::evaluate(
        &settings.filters,
        &metarr.move_ops,
        &metadata_map,
        &cu.url,
        &settings.from_date,
        &settings.to_date,
    );
    if outcome.ignore {
        if let Err(e) = tokio::fs::remove_file(&meta.json_path).await {
            tracing::debug!(error = %e, path = %meta.json_path.display(), "no sidecar to delete for ignored video");
        }
        // `finished=true`: the pipeline ran to completion, it just decided to
        // skip this video (spec §3 data model note on `Video.finished`).
        if let Err(e) = runtime.store.mark_video_terminal(video.id, true, true, true).await {
            tracing::warn!(error = %e, video_id = video.id, "failed to mark video ignored");
        }
        finish(runtime, video.id, DownloadStatus::Ignored, 100.0, None).await;
        return PipelineResult::Ignored;
    }
    if let Some(dir) = &outcome.move_output_dir {
        if let Err(e) = runtime.store.set_video_move_output_dir(video.id, dir).await {
            tracing::warn!(error = %e, video_id = video.id, "failed to persist move_output_dir");
        }
    }

    // video-dling
    let output_dir = resolve_output_dir(&metarr, outcome.move_output_dir.as_deref(), &metadata_map);
    if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
        tracing::warn!(error = %e, dir = %output_dir.display(), "failed to create output directory");
    }

    let video_id = video.id;
    let video_url = video.url.clone();
    let cancel_for_retry = cancel.clone();
    let settings_for_retry = settings.clone();
    let video_result = with_retries(retries, &cancel, move || {
        let tracker = runtime.tracker.clone();
        let cancel = cancel_for_retry.clone();
        let output_dir = output_dir.clone();
        let settings = settings_for_retry.clone();
        let video_url = video_url.clone();
        async move {
            downloader::fetch_video(&video_url, &settings, &output_dir, &cancel, move |percent| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker
                        .report(StatusUpdate {
                            video_id,
                            status: DownloadStatus::InProgress,
                            percent,
                            error: None,
                        })
                        .await;
                });
            })
            .await
        }
    })
    .await;

    let downloaded = match video_result {
        Ok(v) => v,
        Err(ErrorClass::BotBlocked) => {
            finish(runtime, video.id, DownloadStatus::Failed, 0.0, Some("bot-blocked during video download")).await;
            return PipelineResult::BotBlocked;
        }
        Err(_) => {
            finish(runtime, video.id, DownloadStatus::Failed, 0.0, Some("video download failed")).await;
            return PipelineResult::Failed;
        }
    };

    if let Err(e) = runtime
        .store
        .set_video_paths(
            video.id,
            Some(&downloaded.final_path.display().to_string()),
            Some(&meta.json_path.display().to_string()),
        )
        .await
    {
        tracing::warn!(error = %e, video_id = video.id, "failed to persist video paths");
    }

    // post-processing
    let filename_ops = metarr_args::resolve_ops(&metarr.filename_ops, metarr_file_ops, &cu.url);
    let meta_ops = metarr_args::resolve_ops(&metarr.meta_ops, metarr_file_ops, &cu.url);
    let mut metarr_args_vec = vec![
        downloaded.final_path.display().to_string(),
        meta.json_path.display().to_string(),
    ];
    for op in filename_ops.into_iter().chain(meta_ops) {
        metarr_args_vec.push(format!("--{}={}", op.key, op.value));
    }

    match downloader::run_metarr(&metarr_args_vec, &cancel).await {
        Ok(Some(result)) => {
            if let Err(e) = runtime
                .store
                .set_video_paths(
                    video.id,
                    result.final_video_path.as_deref().map(|p| p.display().to_string()).as_deref(),
                    result.final_json_path.as_deref().map(|p| p.display().to_string()).as_deref(),
                )
                .await
            {
                tracing::warn!(error = %e, video_id = video.id, "failed to persist metarr output paths");
            }
        }
        Ok(None) => tracing::debug!(video_id = video.id, "metarr not installed, skipping post-processing"),
        Err(_) => tracing::warn!(video_id = video.id, "metarr post-processing failed, keeping raw download"),
    }

    if let Err(e) = runtime.store.mark_video_terminal(video.id, true, false, false).await {
        tracing::warn!(error = %e, video_id = video.id, "failed to mark video finished");
    }
    finish(runtime, video.id, DownloadStatus::Completed, 100.0, None).await;
    PipelineResult::Completed
}

async fn finish(runtime: &Runtime, video_id: i64, status: DownloadStatus, percent: f64, error: Option<&str>) {
    runtime
        .tracker
        .report(StatusUpdate {
            video_id,
            status,
            percent,
            error: error.map(str::to_string),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_then_caps() {
        assert_eq!(retry_delay(1), std::time::Duration::from_secs(5));
        assert_eq!(retry_delay(2), std::time::Duration::from_secs(10));
        assert_eq!(retry_delay(3), std::time::Duration::from_secs(15));
        assert_eq!(retry_delay(10), std::time::Duration::from_secs(15));
    }

    #[tokio::test]
    async fn with_retries_exhausts_then_returns_transient() {
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), ErrorClass> = with_retries(2, &cancel, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ErrorClass::Transient) }
        })
        .await;
        assert_eq!(result, Err(ErrorClass::Transient));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retries_does_not_retry_bot_blocked() {
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), ErrorClass> = with_retries(5, &cancel, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ErrorClass::BotBlocked) }
        })
        .await;
        assert_eq!(result, Err(ErrorClass::BotBlocked));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
