//! Standings page client.
//!
//! Fetches the rendered league table page and extracts the team rows. The
//! page is filled in client-side, so a fetch keeps polling until the
//! standings list shows up or the page-ready timeout runs out.

pub mod html;
pub mod parse;

use std::future::Future;
use std::time::Duration;

use common::config::SourceConfig;
use common::{Dataset, Error, Result};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub use parse::{is_page_ready, parse_standings};

/// Something that can produce a full standings dataset.
///
/// Implementations enforce their own time bound and either return a fully
/// populated dataset or an error; an empty dataset means the source found
/// no rows.
pub trait DatasetSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Dataset>> + Send;
}

/// HTTP client for the Naver KBO standings page.
#[derive(Debug, Clone)]
pub struct NaverStandingsClient {
    client: reqwest::Client,
    url: String,
    referer: String,
    page_ready_timeout: Duration,
    page_poll_interval: Duration,
}

impl NaverStandingsClient {
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .pool_max_idle_per_host(2)
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| Error::Http(format!("failed to build standings HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: cfg.url.clone(),
            referer: cfg.referer.clone(),
            page_ready_timeout: cfg.page_ready_timeout(),
            page_poll_interval: cfg.page_poll_interval(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the page once and return the body.
    pub async fn fetch_page(&self) -> Result<String> {
        debug!("Fetching standings page: {}", self.url);

        let resp = self
            .client
            .get(&self.url)
            .header("Referer", &self.referer)
            .header("Accept", "text/html")
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {} failed: {}", self.url, e)))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "{} returned {}: {}",
                self.url,
                status,
                truncate(&body, 500)
            )));
        }

        resp.text()
            .await
            .map_err(|e| Error::Http(format!("failed to read body from {}: {}", self.url, e)))
    }

    /// Poll the page until the standings list is rendered, then parse it.
    pub async fn fetch_standings(&self) -> Result<Dataset> {
        let started = Instant::now();
        let deadline = started + self.page_ready_timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let page = self.fetch_page().await?;

            if is_page_ready(&page) {
                let data = parse_standings(&page);
                info!(
                    "Fetched {} teams in {:.1}s ({} attempt(s))",
                    data.len(),
                    started.elapsed().as_secs_f64(),
                    attempts
                );
                return Ok(data);
            }

            if Instant::now() + self.page_poll_interval >= deadline {
                warn!(
                    "Standings list never appeared after {} attempt(s); page starts with: {}",
                    attempts,
                    truncate(page.trim_start(), 200)
                );
                return Err(Error::PageNotReady {
                    url: self.url.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            debug!("Standings list not rendered yet (attempt {}), retrying", attempts);
            sleep(self.page_poll_interval).await;
        }
    }
}

impl DatasetSource for NaverStandingsClient {
    async fn fetch(&self) -> Result<Dataset> {
        self.fetch_standings().await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
