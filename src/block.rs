//! BlockRegistry (spec §4.3): per-hostname bot-block backoff keyed by
//! (eTLD+1, auth-context), with timed expiry and persistence.
//!
//! Concurrency: a `dashmap::DashMap` stands in for the single RW-lock the
//! spec describes — each shard carries its own lock internally, so writes
//! only take an exclusive path for the shard they touch, which is the same
//! "short critical sections" property spec §4.3 asks for.

use crate::error::CoreError;
use crate::store::Store;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum BlockContext {
    Auth,
    Cookie,
    Unauth,
}

impl BlockContext {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            BlockContext::Auth => "auth",
            BlockContext::Cookie => "cookie",
            BlockContext::Unauth => "unauth",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "auth" => BlockContext::Auth,
            "cookie" => BlockContext::Cookie,
            "unauth" => BlockContext::Unauth,
            _ => return None,
        })
    }
}

/// Inputs needed to decide which auth context a channel URL operates under
/// (spec §4.3 `context_for`): username+login-URL outranks a cookie source
/// or global-cookies flag, which outranks the bare unauthenticated case.
pub(crate) struct AuthContextInput<'a> {
    pub(crate) username: Option<&'a str>,
    pub(crate) login_url: Option<&'a str>,
    pub(crate) cookies_from_browser: Option<&'a str>,
    pub(crate) use_global_cookies: bool,
}

pub(crate) fn context_for(input: &AuthContextInput<'_>) -> BlockContext {
    if input.username.is_some() && input.login_url.is_some() {
        BlockContext::Auth
    } else if input.cookies_from_browser.is_some() || input.use_global_cookies {
        BlockContext::Cookie
    } else {
        BlockContext::Unauth
    }
}

/// Normalizes an arbitrary URL or host string to its eTLD+1, lowercased
/// (spec §4.3 `block`).
pub(crate) fn etld_plus_one(url_or_host: &str) -> Result<String, CoreError> {
    let host = url::Url::parse(url_or_host)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url_or_host.to_string());
    let lower = host.to_lowercase();

    addr::parse_domain_name(&lower)
        .ok()
        .and_then(|name| name.root().map(str::to_string))
        .ok_or_else(|| CoreError::Validation(format!("could not derive eTLD+1 from '{url_or_host}'")))
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

pub(crate) struct BlockRegistry {
    map: DashMap<(String, BlockContext), DateTime<Utc>>,
    store: Store,
    timeouts: HashMap<String, Duration>,
}

impl BlockRegistry {
    pub(crate) fn new(store: Store, timeouts: HashMap<String, Duration>) -> Self {
        BlockRegistry {
            map: DashMap::new(),
            store,
            timeouts,
        }
    }

    fn timeout_for(&self, domain: &str) -> Duration {
        self.timeouts.get(domain).copied().unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Rebuilds the in-memory map from the store (spec §4.3 `load_all`,
    /// called on startup).
    pub(crate) async fn load_all(&self) -> Result<(), CoreError> {
        self.map.clear();
        for row in self.store.list_blocked_domains().await? {
            self.map.insert((row.domain, row.context), row.blocked_at);
        }
        Ok(())
    }

    pub(crate) async fn block(&self, domain: &str, context: BlockContext) -> Result<(), CoreError> {
        let domain = domain.to_lowercase();
        let now = Utc::now();
        self.store.upsert_blocked_domain(&domain, context, now).await?;
        self.map.insert((domain, context), now);
        Ok(())
    }

    /// `true` only while `now < blocked_at + timeout(domain)` (spec §4.3,
    /// boundary scenario 4 in §8).
    pub(crate) fn is_blocked(&self, domain: &str, context: BlockContext) -> (bool, Option<DateTime<Utc>>, Option<Duration>) {
        let domain = domain.to_lowercase();
        let Some(blocked_at) = self.map.get(&(domain.clone(), context)).map(|e| *e.value()) else {
            return (false, None, None);
        };

        let timeout = self.timeout_for(&domain);
        let Ok(timeout_chrono) = chrono::Duration::from_std(timeout) else {
            return (false, Some(blocked_at), None);
        };
        let expires_at = blocked_at + timeout_chrono;
        let now = Utc::now();

        if now < expires_at {
            let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
            (true, Some(blocked_at), Some(remaining))
        } else {
            (false, Some(blocked_at), None)
        }
    }

    pub(crate) async fn unblock(&self, domain: &str, context: Option<BlockContext>) -> Result<(), CoreError> {
        let domain = domain.to_lowercase();
        self.store.delete_blocked_domain(&domain, context).await?;
        match context {
            Some(ctx) => {
                self.map.remove(&(domain, ctx));
            }
            None => {
                self.map
                    .retain(|(d, _), _| d != &domain);
            }
        }
        Ok(())
    }

    /// Removes all entries past their timeout (spec §4.3 `clean_expired`,
    /// called on startup and periodically).
    pub(crate) async fn clean_expired(&self) -> Result<(), CoreError> {
        let now = Utc::now();
        let mut expired_cutoff_candidates: Vec<(String, BlockContext)> = Vec::new();
        for entry in self.map.iter() {
            let (domain, context) = entry.key().clone();
            let timeout = self.timeout_for(&domain);
            let Ok(timeout_chrono) = chrono::Duration::from_std(timeout) else {
                continue;
            };
            if now >= *entry.value() + timeout_chrono {
                expired_cutoff_candidates.push((domain, context));
            }
        }
        for (domain, context) in expired_cutoff_candidates {
            self.store.delete_blocked_domain(&domain, Some(context)).await?;
            self.map.remove(&(domain, context));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> BlockRegistry {
        let store = Store::open(":memory:").await.expect("open store");
        BlockRegistry::new(store, HashMap::new())
    }

    #[test]
    fn context_priority_auth_over_cookie_over_unauth() {
        assert_eq!(
            context_for(&AuthContextInput {
                username: Some("me"),
                login_url: Some("https://example.com/login"),
                cookies_from_browser: Some("firefox"),
                use_global_cookies: true,
            }),
            BlockContext::Auth
        );
        assert_eq!(
            context_for(&AuthContextInput {
                username: None,
                login_url: None,
                cookies_from_browser: Some("firefox"),
                use_global_cookies: false,
            }),
            BlockContext::Cookie
        );
        assert_eq!(
            context_for(&AuthContextInput {
                username: None,
                login_url: None,
                cookies_from_browser: None,
                use_global_cookies: false,
            }),
            BlockContext::Unauth
        );
    }

    #[tokio::test]
    async fn block_then_unblock_roundtrip() {
        let reg = registry().await;
        reg.block("example.com", BlockContext::Auth).await.expect("block");
        let (blocked, _, _) = reg.is_blocked("example.com", BlockContext::Auth);
        assert!(blocked);

        reg.unblock("example.com", None).await.expect("unblock");
        let (blocked, _, _) = reg.is_blocked("example.com", BlockContext::Auth);
        assert!(!blocked);
    }

    #[test]
    fn etld_plus_one_strips_subdomain() {
        assert_eq!(etld_plus_one("https://www.bbc.co.uk/iplayer").unwrap(), "bbc.co.uk");
        assert_eq!(etld_plus_one("https://foo.bar.google.com").unwrap(), "google.com");
    }
}
