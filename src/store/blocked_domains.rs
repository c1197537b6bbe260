use super::Store;
use crate::block::BlockContext;
use crate::error::CoreError;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub(crate) struct BlockedDomainRow {
    pub(crate) domain: String,
    pub(crate) context: BlockContext,
    pub(crate) blocked_at: DateTime<Utc>,
}

impl Store {
    pub(crate) async fn upsert_blocked_domain(
        &self,
        domain: &str,
        context: BlockContext,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO blocked_domains (domain, context, blocked_at) VALUES (?, ?, ?)
             ON CONFLICT(domain, context) DO UPDATE SET blocked_at = excluded.blocked_at;",
        )
        .bind(domain)
        .bind(context.as_str())
        .bind(blocked_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub(crate) async fn delete_blocked_domain(
        &self,
        domain: &str,
        context: Option<BlockContext>,
    ) -> Result<(), CoreError> {
        match context {
            Some(ctx) => {
                sqlx::query("DELETE FROM blocked_domains WHERE domain = ? AND context = ?;")
                    .bind(domain)
                    .bind(ctx.as_str())
                    .execute(self.pool())
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM blocked_domains WHERE domain = ?;")
                    .bind(domain)
                    .execute(self.pool())
                    .await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn delete_blocked_domains_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM blocked_domains WHERE blocked_at <= ?;")
            .bind(cutoff.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn list_blocked_domains(&self) -> Result<Vec<BlockedDomainRow>, CoreError> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT domain, context, blocked_at FROM blocked_domains")
                .fetch_all(self.pool())
                .await?;

        rows.into_iter()
            .map(|(domain, context, blocked_at)| {
                let context = BlockContext::parse(&context)
                    .ok_or_else(|| CoreError::Validation(format!("corrupt block context: {context}")))?;
                let blocked_at = DateTime::parse_from_rfc3339(&blocked_at)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| CoreError::Validation(format!("corrupt blocked_at: {e}")))?;
                Ok(BlockedDomainRow {
                    domain,
                    context,
                    blocked_at,
                })
            })
            .collect()
    }
}
