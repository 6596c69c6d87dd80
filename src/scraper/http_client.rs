use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::{first_present, page_title, BrowserSession, SessionLauncher};
use crate::config::CrawlerConfig;
use crate::error::{CrawlError, CrawlResult};

/// Plain HTTP backend for pages that render their data server-side
pub struct HttpLauncher {
    client: Client,
    request_timeout: Duration,
}

impl HttpLauncher {
    pub fn new(config: &CrawlerConfig) -> CrawlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert("Accept-Language", HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.5"));

        let request_timeout = Duration::from_secs(config.implicit_wait_seconds);
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| CrawlError::config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { client, request_timeout })
    }
}

#[async_trait]
impl SessionLauncher for HttpLauncher {
    fn name(&self) -> &str {
        "http"
    }

    async fn launch(&self) -> CrawlResult<Box<dyn BrowserSession>> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            request_timeout: self.request_timeout,
            html: None,
            final_url: None,
        }))
    }
}

struct HttpSession {
    client: Client,
    request_timeout: Duration,
    html: Option<String>,
    final_url: Option<String>,
}

impl HttpSession {
    fn html(&self) -> CrawlResult<&str> {
        self.html
            .as_deref()
            .ok_or_else(|| CrawlError::fetch("no page loaded"))
    }

    fn request_error(&self, url: &str, error: reqwest::Error) -> CrawlError {
        if error.is_timeout() {
            CrawlError::FetchTimeout {
                url: url.to_string(),
                waited_secs: self.request_timeout.as_secs(),
            }
        } else {
            CrawlError::fetch(format!("request to {} failed: {}", url, error))
        }
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(&mut self, url: &str) -> CrawlResult<()> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::fetch(format!("{} returned HTTP {}", url, status)));
        }

        self.final_url = Some(response.url().to_string());
        let body = response.text().await.map_err(|e| self.request_error(url, e))?;
        self.html = Some(body);
        Ok(())
    }

    /// Static markup: present now or never
    async fn wait_for_any(&mut self, selectors: &[String], _timeout: Duration) -> CrawlResult<Option<String>> {
        Ok(first_present(self.html()?, selectors))
    }

    async fn scroll_to_end(&mut self, _max_passes: u32) -> CrawlResult<u32> {
        Ok(0)
    }

    async fn content(&mut self) -> CrawlResult<String> {
        self.html().map(str::to_string)
    }

    async fn title(&mut self) -> CrawlResult<Option<String>> {
        Ok(page_title(self.html()?))
    }

    async fn current_url(&mut self) -> CrawlResult<Option<String>> {
        Ok(self.final_url.clone())
    }

    async fn screenshot(&mut self, _path: &Path) -> CrawlResult<bool> {
        warn!("Screenshots need the browser backend, skipping");
        Ok(false)
    }

    async fn close(self: Box<Self>) -> CrawlResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_without_navigation_has_no_content() {
        let launcher = HttpLauncher::new(&CrawlerConfig::default()).unwrap();
        assert_eq!(launcher.name(), "http");

        let mut session = launcher.launch().await.unwrap();
        assert!(matches!(session.content().await, Err(CrawlError::Fetch { .. })));
        assert!(!session.screenshot(Path::new("shot.png")).await.unwrap());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_error() {
        let mut config = CrawlerConfig::default();
        config.implicit_wait_seconds = 2;
        let launcher = HttpLauncher::new(&config).unwrap();

        let mut session = launcher.launch().await.unwrap();
        let result = session.navigate("http://127.0.0.1:9/notice").await;
        assert!(matches!(
            result,
            Err(CrawlError::Fetch { .. }) | Err(CrawlError::FetchTimeout { .. })
        ));
    }
}
