//! Static-HTML sessions for offline runs (`--html-file`) and tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{first_present, page_title, BrowserSession, SessionLauncher};
use crate::error::{CrawlError, CrawlResult};

/// What the next launched session serves
#[derive(Debug, Clone)]
pub enum FixtureResponse {
    Page(String),
    NavigationError(String),
    /// Navigation never completes
    Stall,
}

/// Session lifecycle counters
#[derive(Debug, Default)]
pub struct FixtureStats {
    launched: AtomicUsize,
    closed: AtomicUsize,
    dropped: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

impl FixtureStats {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sessions released by being dropped without `close`
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Sessions currently held
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions open at the same time
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

/// Serves scripted responses, one per launch. The last response repeats.
pub struct FixtureLauncher {
    responses: Mutex<VecDeque<FixtureResponse>>,
    stats: Arc<FixtureStats>,
}

impl FixtureLauncher {
    pub fn new(responses: Vec<FixtureResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            stats: Arc::new(FixtureStats::default()),
        }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self::new(vec![FixtureResponse::Page(html.into())])
    }

    /// Serve a saved page, e.g. one written by `--debug`
    pub async fn from_file(path: impl AsRef<Path>) -> CrawlResult<Self> {
        let path = path.as_ref();
        let html = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CrawlError::config(format!("cannot read HTML file {}: {}", path.display(), e)))?;
        Ok(Self::html(html))
    }

    pub fn stats(&self) -> &FixtureStats {
        &self.stats
    }
}

#[async_trait]
impl SessionLauncher for FixtureLauncher {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn launch(&self) -> CrawlResult<Box<dyn BrowserSession>> {
        let response = {
            let mut responses = self.responses.lock().await;
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        }
        .ok_or_else(|| CrawlError::config("fixture launcher has no responses"))?;

        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FixtureSession {
            response,
            url: None,
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

struct FixtureSession {
    response: FixtureResponse,
    url: Option<String>,
    stats: Arc<FixtureStats>,
    closed: bool,
}

impl Drop for FixtureSession {
    fn drop(&mut self) {
        if !self.closed {
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl FixtureSession {
    fn html(&self) -> CrawlResult<&str> {
        match (&self.response, &self.url) {
            (FixtureResponse::Page(html), Some(_)) => Ok(html.as_str()),
            _ => Err(CrawlError::fetch("no page loaded")),
        }
    }
}

#[async_trait]
impl BrowserSession for FixtureSession {
    async fn navigate(&mut self, url: &str) -> CrawlResult<()> {
        match &self.response {
            FixtureResponse::NavigationError(message) => Err(CrawlError::fetch(message.clone())),
            FixtureResponse::Stall => std::future::pending().await,
            FixtureResponse::Page(_) => {
                self.url = Some(url.to_string());
                Ok(())
            }
        }
    }

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
        Ok(self.url.clone())
    }

    async fn screenshot(&mut self, path: &Path) -> CrawlResult<bool> {
        debug!("Fixture sessions cannot take screenshots ({})", path.display());
        Ok(false)
    }

    async fn close(mut self: Box<Self>) -> CrawlResult<()> {
        self.closed = true;
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.stats.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
