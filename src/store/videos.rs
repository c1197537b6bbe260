use super::Store;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub(crate) struct Video {
    pub(crate) id: i64,
    pub(crate) channel_id: i64,
    pub(crate) channel_url_id: Option<i64>,
    pub(crate) url: String,
    pub(crate) finished: bool,
    pub(crate) ignored: bool,
    pub(crate) was_skipped: bool,
    pub(crate) metadata: Option<serde_json::Value>,
    pub(crate) video_path: Option<String>,
    pub(crate) json_path: Option<String>,
    pub(crate) move_output_dir: Option<String>,
}

/// A video stub produced by the Crawler, not yet persisted (spec §4.5.4).
#[derive(Clone, Debug)]
pub(crate) struct NewVideo {
    pub(crate) channel_url_id: Option<i64>,
    pub(crate) url: String,
}

#[derive(sqlx::FromRow)]
struct VideoRow {
    id: i64,
    channel_id: i64,
    channel_url_id: Option<i64>,
    url: String,
    finished: i64,
    ignored: i64,
    was_skipped: i64,
    metadata_json: Option<String>,
    video_path: Option<String>,
    json_path: Option<String>,
    move_output_dir: Option<String>,
}

fn decode_row(row: VideoRow) -> Result<Video, CoreError> {
    let metadata = row
        .metadata_json
        .map(|j| serde_json::from_str(&j))
        .transpose()
        .map_err(|e| CoreError::Validation(format!("corrupt video metadata JSON: {e}")))?;
    Ok(Video {
        id: row.id,
        channel_id: row.channel_id,
        channel_url_id: row.channel_url_id,
        url: row.url,
        finished: row.finished != 0,
        ignored: row.ignored != 0,
        was_skipped: row.was_skipped != 0,
        metadata,
        video_path: row.video_path,
        json_path: row.json_path,
        move_output_dir: row.move_output_dir,
    })
}

const SELECT_COLUMNS: &str = "SELECT id, channel_id, channel_url_id, url, finished, ignored,
    was_skipped, metadata_json, video_path, json_path, move_output_dir FROM videos";

/// Outcome of [`Store::add_videos`] for a single input URL.
pub(crate) enum AddVideoOutcome {
    Inserted(Video),
    Updated(Video),
    Failed { url: String, error: String },
}

impl Store {
    /// Per-video upsert (spec §4.2 `AddVideos`). If `(channel_id, url)`
    /// exists, updates `{finished, ignored, updated_at}` only; otherwise
    /// inserts the full row and synchronously upserts the matching
    /// `downloads` row. The transaction commits only if no fatal error
    /// occurred; per-video failures are reported but don't roll back rows
    /// that succeeded.
    pub(crate) async fn add_videos(
        &self,
        channel_id: i64,
        videos: &[NewVideo],
    ) -> Result<Vec<AddVideoOutcome>, CoreError> {
        let mut tx = self.pool().begin().await?;
        let mut outcomes = Vec::with_capacity(videos.len());
        let now = Utc::now().to_rfc3339();

        for v in videos {
            let existing: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM videos WHERE channel_id = ? AND url = ?")
                    .bind(channel_id)
                    .bind(&v.url)
                    .fetch_optional(&mut *tx)
                    .await?;

            if let Some((id,)) = existing {
                let update = sqlx::query(
                    "UPDATE videos SET finished = finished, ignored = ignored, updated_at = ? WHERE id = ?;",
                )
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await;
                match update {
                    Ok(_) => {
                        let row: VideoRow = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                            .bind(id)
                            .fetch_one(&mut *tx)
                            .await?;
                        outcomes.push(AddVideoOutcome::Updated(decode_row(row)?));
                    }
                    Err(e) => outcomes.push(AddVideoOutcome::Failed {
                        url: v.url.clone(),
                        error: e.to_string(),
                    }),
                }
                continue;
            }

            let insert = sqlx::query(
                "INSERT INTO videos (channel_id, channel_url_id, url, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?);",
            )
            .bind(channel_id)
            .bind(v.channel_url_id)
            .bind(&v.url)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            let video_id = match insert {
                Ok(r) => r.last_insert_rowid(),
                Err(e) => {
                    outcomes.push(AddVideoOutcome::Failed {
                        url: v.url.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            sqlx::query(
                "INSERT INTO downloads (video_id, status, percent, updated_at)
                 VALUES (?, 'pending', 0.0, ?)
                 ON CONFLICT(video_id) DO UPDATE SET updated_at = excluded.updated_at;",
            )
            .bind(video_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let row: VideoRow = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                .bind(video_id)
                .fetch_one(&mut *tx)
                .await?;
            outcomes.push(AddVideoOutcome::Inserted(decode_row(row)?));
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    /// Lists every video row for a channel, most recently created first —
    /// the `video list` CLI surface command (spec §6).
    pub(crate) async fn list_videos_by_channel(&self, channel_id: i64) -> Result<Vec<Video>, CoreError> {
        let rows: Vec<VideoRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE channel_id = ? ORDER BY id DESC"))
                .bind(channel_id)
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(decode_row).collect()
    }

    pub(crate) async fn get_video(&self, id: i64) -> Result<Option<Video>, CoreError> {
        let row: Option<VideoRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(decode_row).transpose()
    }

    /// URLs previously marked `finished` or `ignored` for this channel — used
    /// by the Crawler to deduplicate newly-discovered URLs (spec §4.5.3).
    pub(crate) async fn get_downloaded_or_ignored_video_urls(
        &self,
        channel_id: i64,
    ) -> Result<HashMap<String, ()>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT url FROM videos WHERE channel_id = ? AND (finished = 1 OR ignored = 1)",
        )
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(u,)| (u, ())).collect())
    }

    pub(crate) async fn set_video_metadata(
        &self,
        video_id: i64,
        metadata: &serde_json::Value,
    ) -> Result<(), CoreError> {
        let json = serde_json::to_string(metadata).map_err(|e| CoreError::Validation(e.to_string()))?;
        sqlx::query("UPDATE videos SET metadata_json = ?, updated_at = ? WHERE id = ?;")
            .bind(&json)
            .bind(Utc::now().to_rfc3339())
            .bind(video_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub(crate) async fn set_video_move_output_dir(&self, video_id: i64, dir: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE videos SET move_output_dir = ? WHERE id = ?;")
            .bind(dir)
            .bind(video_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub(crate) async fn set_video_paths(
        &self,
        video_id: i64,
        video_path: Option<&str>,
        json_path: Option<&str>,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE videos SET video_path = COALESCE(?, video_path), json_path = COALESCE(?, json_path), updated_at = ? WHERE id = ?;")
            .bind(video_path)
            .bind(json_path)
            .bind(Utc::now().to_rfc3339())
            .bind(video_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub(crate) async fn mark_video_terminal(
        &self,
        video_id: i64,
        finished: bool,
        ignored: bool,
        was_skipped: bool,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE videos SET finished = ?, ignored = ?, was_skipped = ?, updated_at = ? WHERE id = ?;",
        )
        .bind(finished)
        .bind(ignored)
        .bind(was_skipped)
        .bind(Utc::now().to_rfc3339())
        .bind(video_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Deletes videos by URL for a channel: selects target rows, best-effort
    /// deletes media/JSON files from disk (failures logged, not fatal), then
    /// deletes the DB rows (spec §4.2 `DeleteVideosByURLs`).
    pub(crate) async fn delete_videos_by_urls(
        &self,
        channel_id: i64,
        urls: &[String],
    ) -> Result<usize, CoreError> {
        if urls.is_empty() {
            return Ok(0);
        }
        let mut deleted = 0usize;
        for url in urls {
            let row: Option<VideoRow> =
                sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE channel_id = ? AND url = ?"))
                    .bind(channel_id)
                    .bind(url)
                    .fetch_optional(self.pool())
                    .await?;
            let Some(row) = row else { continue };

            for path in [&row.video_path, &row.json_path].into_iter().flatten() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(error = %e, path, "failed to delete file on disk, continuing with DB delete");
                }
            }

            sqlx::query("DELETE FROM videos WHERE id = ?;")
                .bind(row.id)
                .execute(self.pool())
                .await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetarrArgs, Settings};
    use crate::store::channels::NewChannelUrl;

    async fn mem_store() -> Store {
        Store::open(":memory:").await.expect("open store")
    }

    #[tokio::test]
    async fn add_videos_is_idempotent() {
        let store = mem_store().await;
        let channel = store
            .add_channel("chan", &Settings::default(), &MetarrArgs::default(), &[])
            .await
            .expect("add channel");

        let videos = vec![NewVideo {
            channel_url_id: None,
            url: "https://example.com/watch?v=1".into(),
        }];

        let first = store.add_videos(channel.id, &videos).await.expect("first add");
        assert!(matches!(first[0], AddVideoOutcome::Inserted(_)));

        let second = store.add_videos(channel.id, &videos).await.expect("second add");
        assert!(matches!(second[0], AddVideoOutcome::Updated(_)));

        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM videos")
            .fetch_all(store.pool())
            .await
            .expect("select");
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn dedup_skips_finished_and_ignored() {
        let store = mem_store().await;
        let channel = store
            .add_channel("chan2", &Settings::default(), &MetarrArgs::default(), &[])
            .await
            .expect("add channel");

        let videos = vec![NewVideo {
            channel_url_id: None,
            url: "https://example.com/watch?v=2".into(),
        }];
        let outcomes = store.add_videos(channel.id, &videos).await.expect("add");
        let AddVideoOutcome::Inserted(v) = &outcomes[0] else {
            panic!("expected insert")
        };
        store
            .mark_video_terminal(v.id, true, false, false)
            .await
            .expect("mark finished");

        let seen = store
            .get_downloaded_or_ignored_video_urls(channel.id)
            .await
            .expect("dedup set");
        assert!(seen.contains_key("https://example.com/watch?v=2"));
    }
}
