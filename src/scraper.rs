//! Scraper collaborator (spec §6): `GetNewReleases(channel) -> ([]video_stub,
//! error_class)`. Page scraping for "new releases" is explicitly out of
//! core scope (spec §1) — this is a minimal, generic implementation
//! sufficient to exercise the Crawler and its tests, grounded in the
//! teacher's own RSS-regex approach (`numbleroot-autotube/src/rss.rs`)
//! generalized from an RSS feed to an arbitrary listing page.

use crate::error::ErrorClass;
use std::sync::LazyLock;

#[derive(Clone, Debug)]
pub(crate) struct VideoStub {
    pub(crate) url: String,
    pub(crate) title: Option<String>,
    pub(crate) thumbnail: Option<String>,
}

static HREF_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r#"href="([^"]+watch\?v=[^"&]+[^"]*)""#).expect("valid regex"));

#[async_trait::async_trait]
pub(crate) trait Scraper: Send + Sync {
    async fn get_new_releases(&self, channel_url: &str) -> Result<Vec<VideoStub>, ErrorClass>;
}

/// Fetches `channel_url` over HTTP and extracts candidate video URLs via a
/// fixed `href` pattern. Treats HTTP 403/429 as bot-blocked, any other
/// non-success status or connection failure as transient.
pub(crate) struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub(crate) fn new() -> Self {
        HttpScraper {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for HttpScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Scraper for HttpScraper {
    async fn get_new_releases(&self, channel_url: &str) -> Result<Vec<VideoStub>, ErrorClass> {
        let resp = self
            .client
            .get(channel_url)
            .send()
            .await
            .map_err(|_| ErrorClass::Transient)?;

        match resp.status() {
            reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(ErrorClass::BotBlocked);
            }
            s if !s.is_success() => return Err(ErrorClass::Transient),
            _ => {}
        }

        let body = resp.text().await.map_err(|_| ErrorClass::Transient)?;
        Ok(extract_video_stubs(&body))
    }
}

fn extract_video_stubs(html: &str) -> Vec<VideoStub> {
    let mut seen = std::collections::HashSet::new();
    HREF_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|url| seen.insert(url.clone()))
        .map(|url| VideoStub {
            url,
            title: None,
            thumbnail: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_dedup_video_links() {
        let html = r#"
            <a href="https://www.youtube.com/watch?v=abc12345678">One</a>
            <a href="https://www.youtube.com/watch?v=abc12345678">Dup</a>
            <a href="/about">Not a video</a>
        "#;
        let stubs = extract_video_stubs(html);
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].url, "https://www.youtube.com/watch?v=abc12345678");
    }
}
