use async_trait::async_trait;
use chrono::{DateTime, Local};
use scraper::{Html, Selector};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod browser;
pub mod fixture;
pub mod http_client;

pub use browser::ChromiumLauncher;
pub use fixture::{FixtureLauncher, FixtureResponse};
pub use http_client::HttpLauncher;

use crate::config::{CrawlerConfig, FetchBackend};
use crate::error::{CrawlError, CrawlResult};
use crate::utils::write_file;

/// A fully loaded page, detached from the session that produced it
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPage {
    pub requested_url: String,
    pub final_url: String,
    pub title: Option<String>,
    pub html: String,
    /// Readiness selector that was observed, if any
    pub ready_selector: Option<String>,
    pub screenshot: Option<PathBuf>,
    pub fetched_at: DateTime<Local>,
}

impl LoadedPage {
    /// Page built from static HTML, as if served from `url`
    pub fn from_html(url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        let html = html.into();
        Self {
            title: page_title(&html),
            requested_url: url.clone(),
            final_url: url,
            html,
            ready_selector: None,
            screenshot: None,
            fetched_at: Local::now(),
        }
    }
}

/// One exclusively owned page session (a browser tab or an HTTP exchange)
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> CrawlResult<()>;

    /// First selector from `selectors` present within `timeout`, or `None`
    async fn wait_for_any(&mut self, selectors: &[String], timeout: Duration) -> CrawlResult<Option<String>>;

    /// Scroll until the page stops growing; returns passes made
    async fn scroll_to_end(&mut self, max_passes: u32) -> CrawlResult<u32>;

    async fn content(&mut self) -> CrawlResult<String>;

    async fn title(&mut self) -> CrawlResult<Option<String>>;

    async fn current_url(&mut self) -> CrawlResult<Option<String>>;

    /// Save a screenshot; `false` when the backend cannot take one
    async fn screenshot(&mut self, path: &Path) -> CrawlResult<bool>;

    async fn close(self: Box<Self>) -> CrawlResult<()>;
}

/// Acquires fresh sessions
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self) -> CrawlResult<Box<dyn BrowserSession>>;
}

/// Launcher for the configured backend
pub fn launcher_for(config: &CrawlerConfig) -> CrawlResult<Arc<dyn SessionLauncher>> {
    Ok(match config.backend {
        FetchBackend::Browser => Arc::new(ChromiumLauncher::new(config)),
        FetchBackend::Http => Arc::new(HttpLauncher::new(config)?),
    })
}

/// Wait bounds and side channels for one fetch
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub implicit_wait: Duration,
    pub explicit_wait: Duration,
    pub readiness_selectors: Vec<String>,
    pub require_ready: bool,
    pub scroll_passes: u32,
    pub settle_delay: Duration,
    pub screenshot_dir: Option<PathBuf>,
    pub debug_html_path: Option<PathBuf>,
}

impl FetchOptions {
    pub fn from_config(config: &CrawlerConfig, output_dir: &Path) -> Self {
        Self {
            implicit_wait: Duration::from_secs(config.implicit_wait_seconds),
            explicit_wait: Duration::from_secs(config.explicit_wait_seconds),
            readiness_selectors: config.readiness_selectors.clone(),
            require_ready: config.require_ready,
            scroll_passes: config.scroll_passes,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            screenshot_dir: config.screenshot.then(|| output_dir.to_path_buf()),
            debug_html_path: config.debug.then(|| output_dir.join("debug_page_source.html")),
        }
    }

    /// Capture the page even when no readiness selector shows up
    pub fn lenient(mut self) -> Self {
        self.require_ready = false;
        self
    }
}

/// Drives one session per fetch and always releases it
pub struct PageFetcher {
    launcher: Arc<dyn SessionLauncher>,
    options: FetchOptions,
}

impl PageFetcher {
    pub fn new(launcher: Arc<dyn SessionLauncher>, options: FetchOptions) -> Self {
        Self { launcher, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Load `url` and wait for dynamic content.
    ///
    /// Fails with `FetchTimeout` when no readiness selector appears within
    /// the explicit wait (unless readiness is lenient) and with `Fetch` for
    /// navigation or network failures. The session is closed on every path
    /// that returns. When the caller drops this future mid-fetch (the retry
    /// deadline does), `close` never runs and the session is released by its
    /// `Drop`; for Chromium that kills the browser process.
    pub async fn fetch(&self, url: &str) -> CrawlResult<LoadedPage> {
        debug!(launcher = self.launcher.name(), "Acquiring session");
        let mut session = self.launcher.launch().await?;

        let result = self.load(session.as_mut(), url).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close session: {}", e);
        }

        result
    }

    async fn load(&self, session: &mut dyn BrowserSession, url: &str) -> CrawlResult<LoadedPage> {
        self.bounded(url, session.navigate(url)).await?;

        let ready_selector = tokio::time::timeout(
            self.options.explicit_wait + self.options.implicit_wait,
            session.wait_for_any(&self.options.readiness_selectors, self.options.explicit_wait),
        )
        .await
        .unwrap_or(Ok(None))?;

        match &ready_selector {
            Some(selector) => debug!(selector = %selector, "Page ready"),
            None if self.options.require_ready => {
                return Err(CrawlError::FetchTimeout {
                    url: url.to_string(),
                    waited_secs: self.options.explicit_wait.as_secs(),
                });
            }
            None => warn!(
                "No readiness selector appeared within {}s, capturing anyway",
                self.options.explicit_wait.as_secs()
            ),
        }

        if self.options.scroll_passes > 0 {
            match self.bounded(url, session.scroll_to_end(self.options.scroll_passes)).await {
                Ok(passes) => debug!(passes, "Scrolled to end of page"),
                Err(e) => warn!("Scrolling failed, continuing with current content: {}", e),
            }
        }

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        let html = self.bounded(url, session.content()).await?;
        let title = session.title().await.ok().flatten();
        let final_url = session
            .current_url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        let fetched_at = Local::now();

        let screenshot = match &self.options.screenshot_dir {
            Some(dir) => self.take_screenshot(session, dir, fetched_at).await,
            None => None,
        };

        if let Some(path) = &self.options.debug_html_path {
            match write_file(path, html.as_bytes()).await {
                Ok(()) => info!("Page source saved to {}", path.display()),
                Err(e) => warn!("Failed to save page source: {}", e),
            }
        }

        info!(url = %final_url, bytes = html.len(), "Page loaded");

        Ok(LoadedPage {
            requested_url: url.to_string(),
            final_url,
            title,
            html,
            ready_selector,
            screenshot,
            fetched_at,
        })
    }

    async fn take_screenshot(
        &self,
        session: &mut dyn BrowserSession,
        dir: &Path,
        at: DateTime<Local>,
    ) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Cannot create screenshot directory: {}", e);
            return None;
        }
        let path = dir.join(format!("screenshot_{}.png", at.format("%Y%m%d_%H%M%S")));

        match session.screenshot(&path).await {
            Ok(true) => {
                info!("Screenshot saved to {}", path.display());
                Some(path)
            }
            Ok(false) => None,
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    }

    /// Bound a single session command by the implicit wait
    async fn bounded<T>(&self, url: &str, command: impl Future<Output = CrawlResult<T>>) -> CrawlResult<T> {
        tokio::time::timeout(self.options.implicit_wait, command)
            .await
            .map_err(|_| CrawlError::FetchTimeout {
                url: url.to_string(),
                waited_secs: self.options.implicit_wait.as_secs(),
            })?
    }
}

/// First selector that matches anything in `html`
pub fn first_present(html: &str, selectors: &[String]) -> Option<String> {
    let document = Html::parse_document(html);
    selectors
        .iter()
        .find(|css| {
            Selector::parse(css)
                .map(|selector| document.select(&selector).next().is_some())
                .unwrap_or(false)
        })
        .cloned()
}

/// Text of the `<title>` element
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}
