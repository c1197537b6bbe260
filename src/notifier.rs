//! Notifier (spec §4.8): posts an empty `application/json` body to each
//! configured notify URL after a channel completes. Distinguishes LAN
//! (self-hosted, TLS verification disabled) from public endpoints so that
//! self-signed reverse proxies on a home network don't need a real
//! certificate.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;
use std::time::Duration;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

static LAN_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(NOTIFY_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

static PUBLIC_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(NOTIFY_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => is_unique_local(v6) || v6.is_loopback() || is_link_local_v6(v6),
    }
}

fn is_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Resolves `host` to decide whether a LAN (private-range) client should be
/// used. Hostname `localhost` and literal private IPs short-circuit DNS;
/// anything else falls back to resolution, treating lookup failure as
/// "not private" (spec §4.8).
async fn is_lan_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(ip);
    }
    if ip_is_loopback_literal(host) {
        return true;
    }

    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => addrs.into_iter().any(|a| is_private_ip(a.ip())),
        Err(_) => false,
    }
}

fn ip_is_loopback_literal(host: &str) -> bool {
    host == Ipv4Addr::LOCALHOST.to_string() || host == "::1"
}

#[derive(Debug)]
pub(crate) struct NotifyFailure {
    pub(crate) url: String,
    pub(crate) error: String,
}

/// Posts to every `notify_urls` entry. Per-URL failures are collected and
/// returned, never propagated as a hard error (spec §4.8).
pub(crate) async fn notify_all(notify_urls: &[String]) -> Vec<NotifyFailure> {
    let mut failures = Vec::new();
    for url in notify_urls {
        if let Err(error) = notify_one(url).await {
            failures.push(NotifyFailure {
                url: url.clone(),
                error,
            });
        }
    }
    failures
}

async fn notify_one(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| e.to_string())?;
    let host = parsed.host_str().ok_or_else(|| "notify URL has no host".to_string())?;

    let client = if is_lan_host(host).await {
        &*LAN_CLIENT
    } else {
        &*PUBLIC_CLIENT
    };

    let resp = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{}")
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(format!("notify URL returned {}", resp.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rfc1918_and_loopback_as_private() {
        assert!(is_private_ip("192.168.1.5".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("172.16.5.5".parse().unwrap()));
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn classifies_ipv6_ula_and_link_local() {
        assert!(is_private_ip("fc00::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn literal_localhost_is_lan() {
        assert!(is_lan_host("localhost").await);
        assert!(is_lan_host("127.0.0.1").await);
    }
}
