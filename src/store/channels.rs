use super::Store;
use crate::config::{self, MetarrArgs, Settings};
use crate::error::CoreError;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub(crate) struct Channel {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) settings: Settings,
    pub(crate) metarr: MetarrArgs,
    pub(crate) last_scan: Option<DateTime<Utc>>,
    pub(crate) crawl_freq_minutes: i64,
    pub(crate) bot_blocked: bool,
    pub(crate) new_video_urls: Vec<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    name: String,
    settings_json: String,
    metarr_json: String,
    last_scan: Option<String>,
    crawl_freq_minutes: i64,
    bot_blocked: i64,
    new_video_urls_json: String,
    created_at: String,
    updated_at: String,
}

fn decode_row(row: ChannelRow) -> Result<Channel, CoreError> {
    let settings: Settings = serde_json::from_str(&row.settings_json)
        .map_err(|e| CoreError::Validation(format!("corrupt settings JSON: {e}")))?;
    config::validate_settings(&settings)?;

    let metarr: MetarrArgs = serde_json::from_str(&row.metarr_json)
        .map_err(|e| CoreError::Validation(format!("corrupt metarr JSON: {e}")))?;
    config::validate_metarr_args(&metarr)?;

    let new_video_urls: Vec<String> = serde_json::from_str(&row.new_video_urls_json)
        .map_err(|e| CoreError::Validation(format!("corrupt new_video_urls JSON: {e}")))?;

    let last_scan = row
        .last_scan
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| CoreError::Validation(format!("corrupt last_scan: {e}")))?;

    Ok(Channel {
        id: row.id,
        name: row.name,
        settings,
        metarr,
        last_scan,
        crawl_freq_minutes: row.crawl_freq_minutes,
        bot_blocked: row.bot_blocked != 0,
        new_video_urls,
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Per-channel-URL fields supplied at creation time; password is encrypted
/// before the row is written (spec §4.2 `AddChannel`). The encryption
/// mechanism itself is the out-of-core password-encryption-at-rest
/// collaborator (spec §1); `encrypt_password` is its narrow interface.
pub(crate) struct NewChannelUrl {
    pub(crate) url: String,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) login_url: Option<String>,
    pub(crate) is_manual: bool,
}

/// Stand-in for the out-of-core password-encryption-at-rest collaborator
/// (spec §1): only its interface is specified here, not an implementation
/// fit for production secrets.
fn encrypt_password(plain: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(plain.len() * 2);
    for b in plain.as_bytes() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl Store {
    /// Inserts a channel and all its channel URLs atomically; rejects
    /// duplicate names (spec §4.2).
    pub(crate) async fn add_channel(
        &self,
        name: &str,
        settings: &Settings,
        metarr: &MetarrArgs,
        urls: &[NewChannelUrl],
    ) -> Result<Channel, CoreError> {
        config::validate_settings(settings)?;
        config::validate_metarr_args(metarr)?;

        let mut tx = self.pool().begin().await?;
        let now = Utc::now().to_rfc3339();
        let settings_json = serde_json::to_string(settings)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        let metarr_json = serde_json::to_string(metarr)
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let insert = sqlx::query(
            "INSERT INTO channels (name, settings_json, metarr_json, crawl_freq_minutes, created_at, updated_at)
             VALUES (?, ?, ?, 30, ?, ?);",
        )
        .bind(name)
        .bind(&settings_json)
        .bind(&metarr_json)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        let channel_id = match insert {
            Ok(r) => r.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await.ok();
                return Err(CoreError::Validation(format!(
                    "channel '{name}' already exists"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        for u in urls {
            let password_encrypted = u.password.as_deref().map(encrypt_password);
            sqlx::query(
                "INSERT INTO channel_urls (channel_id, url, username, password_encrypted, login_url, is_manual, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?);",
            )
            .bind(channel_id)
            .bind(&u.url)
            .bind(&u.username)
            .bind(&password_encrypted)
            .bind(&u.login_url)
            .bind(u.is_manual)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_channel_by_id(channel_id)
            .await?
            .ok_or_else(|| CoreError::Fatal("channel vanished immediately after insert".into()))
    }

    const SELECT_COLUMNS: &'static str = "SELECT id, name, settings_json, metarr_json, last_scan,
                      crawl_freq_minutes, bot_blocked, new_video_urls_json,
                      created_at, updated_at FROM channels";

    pub(crate) async fn get_channel_by_id(&self, id: i64) -> Result<Option<Channel>, CoreError> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!("{} WHERE id = ?", Self::SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(decode_row).transpose()
    }

    pub(crate) async fn get_channel_by_name(&self, name: &str) -> Result<Option<Channel>, CoreError> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!("{} WHERE name = ?", Self::SELECT_COLUMNS))
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(decode_row).transpose()
    }

    pub(crate) async fn list_channels(&self) -> Result<Vec<Channel>, CoreError> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!("{} ORDER BY id", Self::SELECT_COLUMNS))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(decode_row).collect()
    }

    pub(crate) async fn delete_channel(&self, name: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM channels WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Read-modify-write a single `settings_json` column via a caller-supplied
    /// mutator, validated before write (spec §4.2). Returns rows-affected.
    pub(crate) async fn update_channel_settings_json(
        &self,
        channel_id: i64,
        mutate: impl FnOnce(&mut Settings),
    ) -> Result<u64, CoreError> {
        let mut tx = self.pool().begin().await?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT settings_json FROM channels WHERE id = ?")
                .bind(channel_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((settings_json,)) = row else {
            tx.rollback().await.ok();
            return Ok(0);
        };

        let mut settings: Settings = serde_json::from_str(&settings_json)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        mutate(&mut settings);
        config::validate_settings(&settings)?;

        let updated = serde_json::to_string(&settings).map_err(|e| CoreError::Validation(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE channels SET settings_json = ?, updated_at = ? WHERE id = ?;",
        )
        .bind(&updated)
        .bind(&now)
        .bind(channel_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn update_last_scan(&self, channel_id: i64, when: DateTime<Utc>) -> Result<(), CoreError> {
        let when_str = when.to_rfc3339();
        sqlx::query("UPDATE channels SET last_scan = ?, updated_at = ? WHERE id = ?;")
            .bind(&when_str)
            .bind(&when_str)
            .bind(channel_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub(crate) async fn set_bot_blocked(&self, channel_id: i64, blocked: bool) -> Result<(), CoreError> {
        sqlx::query("UPDATE channels SET bot_blocked = ? WHERE id = ?;")
            .bind(blocked)
            .bind(channel_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub(crate) async fn set_paused(&self, channel_id: i64, paused: bool) -> Result<(), CoreError> {
        self.update_channel_settings_json(channel_id, |s| s.paused = paused)
            .await
            .map(|_| ())
    }

    /// Appends URLs to the channel's "new video" surface list, deduplicating.
    pub(crate) async fn add_new_video_urls(&self, channel_id: i64, urls: &[String]) -> Result<(), CoreError> {
        if urls.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT new_video_urls_json FROM channels WHERE id = ?")
                .bind(channel_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((existing_json,)) = row else {
            tx.rollback().await.ok();
            return Ok(());
        };
        let mut existing: Vec<String> = serde_json::from_str(&existing_json).unwrap_or_default();
        for u in urls {
            if !existing.contains(u) {
                existing.push(u.clone());
            }
        }
        let updated = serde_json::to_string(&existing).map_err(|e| CoreError::Validation(e.to_string()))?;
        sqlx::query("UPDATE channels SET new_video_urls_json = ? WHERE id = ?;")
            .bind(&updated)
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Removes URLs from the channel's "new video" surface list. Returns
    /// `true` if the list became empty as a result (caller uses this to
    /// decide whether to clear the notification flag, under the named
    /// mutex held by `Runtime`, spec §5).
    pub(crate) async fn remove_new_video_urls(
        &self,
        channel_id: i64,
        urls: &[String],
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool().begin().await?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT new_video_urls_json FROM channels WHERE id = ?")
                .bind(channel_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((existing_json,)) = row else {
            tx.rollback().await.ok();
            return Ok(true);
        };
        let mut existing: Vec<String> = serde_json::from_str(&existing_json).unwrap_or_default();
        existing.retain(|u| !urls.contains(u));
        let became_empty = existing.is_empty();
        let updated = serde_json::to_string(&existing).map_err(|e| CoreError::Validation(e.to_string()))?;
        sqlx::query("UPDATE channels SET new_video_urls_json = ? WHERE id = ?;")
            .bind(&updated)
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(became_empty)
    }
}
