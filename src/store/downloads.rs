use super::Store;
use crate::error::CoreError;
use chrono::Utc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DownloadStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    Ignored,
}

impl DownloadStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::InProgress => "in-progress",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Ignored => "ignored",
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Ignored
        )
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => DownloadStatus::Pending,
            "in-progress" => DownloadStatus::InProgress,
            "paused" => DownloadStatus::Paused,
            "completed" => DownloadStatus::Completed,
            "failed" => DownloadStatus::Failed,
            "ignored" => DownloadStatus::Ignored,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DownloadStatusRow {
    pub(crate) video_id: i64,
    pub(crate) status: DownloadStatus,
    pub(crate) percent: f64,
    pub(crate) error: Option<String>,
}

impl Store {
    /// Upserts one `downloads` row (`INSERT ... ON CONFLICT(video_id) DO
    /// UPDATE`, spec §4.2).
    pub(crate) async fn upsert_download_status(
        &self,
        video_id: i64,
        status: DownloadStatus,
        percent: f64,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO downloads (video_id, status, percent, error, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(video_id) DO UPDATE SET
                status = excluded.status,
                percent = excluded.percent,
                error = excluded.error,
                updated_at = excluded.updated_at;",
        )
        .bind(video_id)
        .bind(status.as_str())
        .bind(percent)
        .bind(error)
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Batch-write entry point for [`crate::tracker::DownloadTracker`]'s
    /// periodic flush (spec §4.7).
    pub(crate) async fn update_download_statuses(
        &self,
        updates: &[(i64, DownloadStatus, f64, Option<String>)],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now().to_rfc3339();
        for (video_id, status, percent, error) in updates {
            sqlx::query(
                "INSERT INTO downloads (video_id, status, percent, error, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(video_id) DO UPDATE SET
                    status = excluded.status,
                    percent = excluded.percent,
                    error = excluded.error,
                    updated_at = excluded.updated_at;",
            )
            .bind(video_id)
            .bind(status.as_str())
            .bind(percent)
            .bind(error)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn get_download_status(
        &self,
        video_id: i64,
    ) -> Result<Option<DownloadStatusRow>, CoreError> {
        let row: Option<(i64, String, f64, Option<String>)> = sqlx::query_as(
            "SELECT video_id, status, percent, error FROM downloads WHERE video_id = ?",
        )
        .bind(video_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(video_id, status, percent, error)| DownloadStatusRow {
            video_id,
            status: DownloadStatus::parse(&status).unwrap_or(DownloadStatus::Pending),
            percent,
            error,
        }))
    }
}
