//! `Store` — the single owner of all persisted state (spec §3 Ownership).
//! Built on `sqlx`/SQLite the way the teacher's `db.rs` opens its pool and
//! creates its one table, extended to the full schema spec §6 lists.
//!
//! Every write runs inside a transaction; every read returns `(value,
//! found, err)`-shaped results so callers can distinguish "absent" from
//! "error" (spec §4.2) — modeled here as `Result<Option<T>, CoreError>`,
//! which is the idiomatic Rust rendering of that contract (`Ok(None)` is
//! "not found", never an error).

pub(crate) mod blocked_domains;
pub(crate) mod channel_urls;
pub(crate) mod channels;
pub(crate) mod downloads;
pub(crate) mod notifications;
pub(crate) mod program;
mod schema;
pub(crate) mod videos;

pub(crate) use blocked_domains::BlockedDomainRow;
pub(crate) use channel_urls::ChannelUrl;
pub(crate) use channels::{Channel, NewChannelUrl};
pub(crate) use downloads::{DownloadStatus, DownloadStatusRow};
pub(crate) use notifications::Notification;
pub(crate) use program::ProgramSingleton;
pub(crate) use videos::{AddVideoOutcome, NewVideo, Video};

use crate::error::CoreError;

#[derive(Clone)]
pub(crate) struct Store {
    pool: sqlx::sqlite::SqlitePool,
}

impl Store {
    pub(crate) async fn open(database_url: &str) -> Result<Self, CoreError> {
        let is_memory = database_url.contains(":memory:");

        let opts = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(database_url.trim_start_matches("file:"))
            .create_if_missing(true);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            // A bare in-memory database only exists for the lifetime of one
            // connection; cap the pool at one so tests see a single,
            // consistent database instead of a fresh empty one per checkout.
            .max_connections(if is_memory { 1 } else { 8 })
            .connect_with(opts)
            .await?;

        schema::create_all(&pool).await?;

        Ok(Store { pool })
    }

    pub(crate) fn pool(&self) -> &sqlx::sqlite::SqlitePool {
        &self.pool
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}
