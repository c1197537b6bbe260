use super::Store;
use crate::config::{self, MetarrArgs, Settings};
use crate::error::CoreError;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub(crate) struct ChannelUrl {
    pub(crate) id: i64,
    pub(crate) channel_id: i64,
    pub(crate) url: String,
    /// `None` = inherit wholesale from the parent channel (spec §3 invariant 4).
    pub(crate) settings: Option<Settings>,
    pub(crate) metarr: Option<MetarrArgs>,
    pub(crate) username: Option<String>,
    pub(crate) password_encrypted: Option<String>,
    pub(crate) login_url: Option<String>,
    pub(crate) is_manual: bool,
}

#[derive(sqlx::FromRow)]
struct ChannelUrlRow {
    id: i64,
    channel_id: i64,
    url: String,
    settings_json: Option<String>,
    metarr_json: Option<String>,
    username: Option<String>,
    password_encrypted: Option<String>,
    login_url: Option<String>,
    is_manual: i64,
}

fn decode_row(row: ChannelUrlRow) -> Result<ChannelUrl, CoreError> {
    let settings = row
        .settings_json
        .map(|j| serde_json::from_str::<Settings>(&j))
        .transpose()
        .map_err(|e| CoreError::Validation(format!("corrupt channel_url settings JSON: {e}")))?;
    if let Some(s) = &settings {
        config::validate_settings(s)?;
    }
    let metarr = row
        .metarr_json
        .map(|j| serde_json::from_str::<MetarrArgs>(&j))
        .transpose()
        .map_err(|e| CoreError::Validation(format!("corrupt channel_url metarr JSON: {e}")))?;
    if let Some(m) = &metarr {
        config::validate_metarr_args(m)?;
    }

    Ok(ChannelUrl {
        id: row.id,
        channel_id: row.channel_id,
        url: row.url,
        settings,
        metarr,
        username: row.username,
        password_encrypted: row.password_encrypted,
        login_url: row.login_url,
        is_manual: row.is_manual != 0,
    })
}

impl Store {
    pub(crate) async fn list_channel_urls(&self, channel_id: i64) -> Result<Vec<ChannelUrl>, CoreError> {
        let rows: Vec<ChannelUrlRow> = sqlx::query_as(
            "SELECT id, channel_id, url, settings_json, metarr_json, username,
                    password_encrypted, login_url, is_manual
             FROM channel_urls WHERE channel_id = ? ORDER BY id",
        )
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(decode_row).collect()
    }

    pub(crate) async fn add_channel_url(
        &self,
        channel_id: i64,
        url: &str,
        is_manual: bool,
    ) -> Result<ChannelUrl, CoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO channel_urls (channel_id, url, is_manual, created_at) VALUES (?, ?, ?, ?);",
        )
        .bind(channel_id)
        .bind(url)
        .bind(is_manual)
        .bind(&now)
        .execute(self.pool())
        .await;

        let id = match result {
            Ok(r) => r.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(CoreError::Validation(format!(
                    "channel URL '{url}' already tracked for this channel"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let row: ChannelUrlRow = sqlx::query_as(
            "SELECT id, channel_id, url, settings_json, metarr_json, username,
                    password_encrypted, login_url, is_manual
             FROM channel_urls WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        decode_row(row)
    }

    pub(crate) async fn delete_channel_url(&self, channel_id: i64, url: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM channel_urls WHERE channel_id = ? AND url = ?;")
            .bind(channel_id)
            .bind(url)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::channels::NewChannelUrl;
    use crate::store::Store;

    async fn mem_store() -> Store {
        Store::open(":memory:").await.expect("open store")
    }

    #[tokio::test]
    async fn add_and_list_channel_urls() {
        let store = mem_store().await;
        let channel = store
            .add_channel(
                "chan-a",
                &Settings::default(),
                &MetarrArgs::default(),
                &[NewChannelUrl {
                    url: "https://example.com/a".into(),
                    username: None,
                    password: None,
                    login_url: None,
                    is_manual: false,
                }],
            )
            .await
            .expect("add channel");

        let urls = store.list_channel_urls(channel.id).await.expect("list");
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "https://example.com/a");
        assert!(urls[0].settings.is_none());
    }
}
