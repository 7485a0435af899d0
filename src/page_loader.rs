use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::ScrapeError;

/// A fetched, rendered page.
#[derive(Debug, Clone)]
pub struct PageFetch {
    pub html: String,
    pub final_url: String,
    pub http_status: u16,
    pub title: Option<String>,
}

/// Page-fetching capability consumed by the agents. Implementations must be
/// safe to share across concurrent per-aircraft tasks.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageFetch>;
}

/// Extract the `<title>` text from an HTML document.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if title.is_empty() { None } else { Some(title) }
}

/// reqwest-backed page loader with per-host pacing.
///
/// Independent airlines scrape independent sources, so pacing is per host
/// rather than global: consecutive requests to the same host are spaced by
/// at least `min_interval`.
pub struct HttpPageLoader {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: DashMap<String, Instant>,
}

impl HttpPageLoader {
    pub fn new(timeout: Duration, min_interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScrapeError::TransientSource(format!("HTTP client build: {}", e)))?;
        Ok(Self {
            client,
            min_interval,
            last_request: DashMap::new(),
        })
    }

    /// Sleep until the host's minimum inter-request interval has elapsed.
    async fn pace(&self, host: &str) {
        let wait = self
            .last_request
            .get(host)
            .map(|last| self.min_interval.saturating_sub(last.elapsed()))
            .unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            debug!("Pacing request to {} by {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }
        self.last_request.insert(host.to_string(), Instant::now());
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn fetch(&self, url: &str) -> Result<PageFetch> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ScrapeError::TransientSource(format!("Bad URL {}: {}", url, e)))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        self.pace(&host).await;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ScrapeError::TransientSource(format!("Fetch {}: {}", url, e)))?;

        let http_status = response.status().as_u16();
        let final_url = response.url().to_string();
        if !response.status().is_success() {
            return Err(
                ScrapeError::TransientSource(format!("HTTP {} from {}", http_status, url)).into(),
            );
        }

        let html = response
            .text()
            .await
            .map_err(|e| ScrapeError::TransientSource(format!("Read body {}: {}", url, e)))?;
        let title = extract_title(&html);

        metrics::counter!("scraper.pages_fetched").increment(1);
        Ok(PageFetch {
            html,
            final_url,
            http_status,
            title,
        })
    }
}
