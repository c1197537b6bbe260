use super::Store;
use crate::error::CoreError;

#[derive(Clone, Debug)]
pub(crate) struct Notification {
    pub(crate) id: i64,
    pub(crate) channel_id: i64,
    pub(crate) notify_url: String,
    pub(crate) channel_url: Option<String>,
    pub(crate) friendly_name: String,
}

impl Store {
    pub(crate) async fn add_notification(
        &self,
        channel_id: i64,
        notify_url: &str,
        channel_url: Option<&str>,
        friendly_name: &str,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "INSERT INTO notifications (channel_id, notify_url, channel_url, friendly_name)
             VALUES (?, ?, ?, ?);",
        )
        .bind(channel_id)
        .bind(notify_url)
        .bind(channel_url)
        .bind(friendly_name)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn list_notifications(&self, channel_id: i64) -> Result<Vec<Notification>, CoreError> {
        let rows: Vec<(i64, i64, String, Option<String>, String)> = sqlx::query_as(
            "SELECT id, channel_id, notify_url, channel_url, friendly_name
             FROM notifications WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, channel_id, notify_url, channel_url, friendly_name)| Notification {
                    id,
                    channel_id,
                    notify_url,
                    channel_url,
                    friendly_name,
                },
            )
            .collect())
    }
}
