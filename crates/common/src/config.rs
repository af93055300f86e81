//! Server configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cache freshness settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Where and how the standings page is fetched.
    #[serde(default)]
    pub source: SourceConfig,

    /// Consumer loop settings for the daemon.
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minutes after a successful fetch before the cache counts as stale.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
}

/// Standings page fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Rendered standings page.
    #[serde(default = "default_url")]
    pub url: String,

    /// Referer header; the site rejects some requests without one.
    #[serde(default = "default_referer")]
    pub referer: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Give up waiting for the standings list after this long.
    #[serde(default = "default_page_ready_timeout")]
    pub page_ready_timeout_secs: u64,

    /// Delay between page-ready polls.
    #[serde(default = "default_page_poll_interval")]
    pub page_poll_interval_secs: u64,

    /// Timeout for a single HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// How often the daemon reads the cache and republishes the snapshot.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// JSON snapshot output file.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

impl SourceConfig {
    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.page_ready_timeout_secs)
    }

    pub fn page_poll_interval(&self) -> Duration {
        Duration::from_secs(self.page_poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_ttl_minutes() -> u64 {
    10
}
fn default_url() -> String {
    "https://m.sports.naver.com/kbaseball/record/index".into()
}
fn default_referer() -> String {
    "https://sports.naver.com".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1"
        .into()
}
fn default_page_ready_timeout() -> u64 {
    40
}
fn default_page_poll_interval() -> u64 {
    2
}
fn default_request_timeout() -> u64 {
    15
}
fn default_poll_interval() -> u64 {
    30
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("team-ranking.json")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            referer: default_referer(),
            user_agent: default_user_agent(),
            page_ready_timeout_secs: default_page_ready_timeout(),
            page_poll_interval_secs: default_page_poll_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            snapshot_path: default_snapshot_path(),
        }
    }
}
