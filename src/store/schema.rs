//! Table DDL (spec §6 "Persisted state layout"). The CLI/HTTP surface, the
//! TOML config loader and the password-encryption-at-rest layer are out of
//! core scope (spec §1); this module only creates the tables the core's
//! read/write paths touch.

pub(super) async fn create_all(pool: &sqlx::sqlite::SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            settings_json TEXT NOT NULL,
            metarr_json TEXT NOT NULL,
            last_scan TEXT,
            crawl_freq_minutes INTEGER NOT NULL DEFAULT 30,
            bot_blocked INTEGER NOT NULL DEFAULT 0,
            new_video_urls_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS channel_urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            settings_json TEXT,
            metarr_json TEXT,
            username TEXT,
            password_encrypted TEXT,
            login_url TEXT,
            is_manual INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(channel_id, url)
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            channel_url_id INTEGER REFERENCES channel_urls(id) ON DELETE SET NULL,
            url TEXT NOT NULL,
            finished INTEGER NOT NULL DEFAULT 0,
            ignored INTEGER NOT NULL DEFAULT 0,
            was_skipped INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT,
            video_path TEXT,
            json_path TEXT,
            move_output_dir TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(channel_id, url)
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS downloads (
            video_id INTEGER PRIMARY KEY REFERENCES videos(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'pending',
            percent REAL NOT NULL DEFAULT 0.0,
            error TEXT,
            updated_at TEXT NOT NULL
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            notify_url TEXT NOT NULL,
            channel_url TEXT,
            friendly_name TEXT NOT NULL DEFAULT '',
            UNIQUE(channel_id, notify_url)
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blocked_domains (
            domain TEXT NOT NULL,
            context TEXT NOT NULL,
            blocked_at TEXT NOT NULL,
            UNIQUE(domain, context)
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS program (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            running INTEGER NOT NULL DEFAULT 0,
            pid INTEGER NOT NULL DEFAULT 0,
            host TEXT NOT NULL DEFAULT '',
            started_at TEXT,
            heartbeat_at TEXT,
            shutdown_requested INTEGER NOT NULL DEFAULT 0
        ) STRICT;",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO program (id, running, pid, host) VALUES (1, 0, 0, '');",
    )
    .execute(pool)
    .await?;

    Ok(())
}
