use super::Store;
use crate::error::CoreError;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub(crate) struct ProgramSingleton {
    pub(crate) running: bool,
    pub(crate) pid: i64,
    pub(crate) host: String,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) heartbeat_at: Option<DateTime<Utc>>,
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

impl Store {
    pub(crate) async fn get_program_singleton(&self) -> Result<ProgramSingleton, CoreError> {
        let row: (i64, i64, String, Option<String>, Option<String>) = sqlx::query_as(
            "SELECT running, pid, host, started_at, heartbeat_at FROM program WHERE id = 1",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(ProgramSingleton {
            running: row.0 != 0,
            pid: row.1,
            host: row.2,
            started_at: parse_ts(row.3),
            heartbeat_at: parse_ts(row.4),
        })
    }

    pub(crate) async fn claim_program_singleton(
        &self,
        pid: i64,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let now_str = now.to_rfc3339();
        sqlx::query(
            "UPDATE program SET running = 1, pid = ?, host = ?, started_at = ?, heartbeat_at = ? WHERE id = 1;",
        )
        .bind(pid)
        .bind(host)
        .bind(&now_str)
        .bind(&now_str)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub(crate) async fn heartbeat_program_singleton(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query("UPDATE program SET heartbeat_at = ? WHERE id = 1;")
            .bind(now.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub(crate) async fn release_program_singleton(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query("UPDATE program SET running = 0, pid = 0, heartbeat_at = ?, shutdown_requested = 0 WHERE id = 1;")
            .bind(now.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// `quit` CLI surface (SPEC_FULL.md §C): flags the running process for
    /// shutdown without sending it an OS signal. The running scheduler
    /// notices this on its next heartbeat tick.
    pub(crate) async fn request_shutdown(&self) -> Result<(), CoreError> {
        sqlx::query("UPDATE program SET shutdown_requested = 1 WHERE id = 1 AND running = 1;")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Reads and clears the shutdown flag so only the first poller to
    /// observe it acts on it.
    pub(crate) async fn take_shutdown_requested(&self) -> Result<bool, CoreError> {
        let mut tx = self.pool().begin().await?;
        let row: (i64,) = sqlx::query_as("SELECT shutdown_requested FROM program WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        if row.0 != 0 {
            sqlx::query("UPDATE program SET shutdown_requested = 0 WHERE id = 1;")
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(row.0 != 0)
    }
}
