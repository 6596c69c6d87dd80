use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub mod pipeline;
pub mod retry;

pub use pipeline::CrawlAttempt;
pub use retry::{
    transition, AttemptRecord, AttemptResult, CoordinatorState, Event, OutcomeKind, RetryCoordinator, RetryOutcome,
    RetryPolicy,
};

use crate::analysis::{PageAnalyzer, StructureReport};
use crate::config::{validate_target_url, AppConfig};
use crate::error::{CrawlError, CrawlResult};
use crate::export::{ExportFormat, ExportManager, FormatResult};
use crate::extract::RecordExtractor;
use crate::layout::StructureDetector;
use crate::logging::{generate_run_id, LogContext};
use crate::model::{CrawlReport, FeeRecord, RunSummary};
use crate::scraper::{launcher_for, FetchOptions, PageFetcher, SessionLauncher};
use crate::{log_error, log_info, log_warn};

/// Everything one successful run produced
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub url: String,
    pub layout: String,
    pub records: Vec<FeeRecord>,
    pub report: CrawlReport,
    pub summary: RunSummary,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
    pub exports: Vec<FormatResult>,
}

impl RunOutcome {
    pub fn exported_files(&self) -> Vec<&Path> {
        self.exports
            .iter()
            .filter_map(|e| e.result.as_ref().ok())
            .map(|stats| stats.file_path.as_path())
            .collect()
    }

    pub fn failed_exports(&self) -> usize {
        self.exports.iter().filter(|e| e.result.is_err()).count()
    }
}

/// Core application: configuration plus the long-lived collaborators
pub struct FeeCrawler {
    config: AppConfig,
    launcher: Arc<dyn SessionLauncher>,
    detector: Arc<StructureDetector>,
    export_manager: ExportManager,
    run_id: String,
}

impl FeeCrawler {
    /// Crawler using the backend named in the configuration
    pub fn new(config: AppConfig) -> CrawlResult<Self> {
        let launcher = launcher_for(&config.crawler)?;
        Self::with_launcher(config, launcher)
    }

    /// Crawler with an explicit session launcher (offline HTML, tests)
    pub fn with_launcher(config: AppConfig, launcher: Arc<dyn SessionLauncher>) -> CrawlResult<Self> {
        config.validate()?;
        let detector = Arc::new(StructureDetector::new()?);
        let export_manager = ExportManager::new(&config.export);
        let run_id = generate_run_id();

        info!(
            run_id = %run_id,
            backend = launcher.name(),
            layouts = ?detector.layout_names(),
            "Crawler initialized"
        );

        Ok(Self {
            config,
            launcher,
            detector,
            export_manager,
            run_id,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Crawl `url` (or the configured target) with retries, then export.
    ///
    /// Fails only when the retry coordinator gives up or hits a fatal error.
    /// Export failures are reported per format in [`RunOutcome::exports`].
    pub async fn run(&self, url: Option<&str>, formats: &[ExportFormat]) -> CrawlResult<RunOutcome> {
        let url = url.unwrap_or(self.config.crawler.target_url.as_str());
        validate_target_url(url)?;
        let start_time = Local::now();
        let context = LogContext::new("crawler", "run")
            .with_run_id(self.run_id.as_str())
            .with_url(url);
        log_info!(context, "Starting crawl");

        let fetcher = PageFetcher::new(
            Arc::clone(&self.launcher),
            FetchOptions::from_config(&self.config.crawler, &self.config.export.output_directory),
        );
        let attempt = CrawlAttempt::new(fetcher, Arc::clone(&self.detector), RecordExtractor::new());
        let coordinator =
            RetryCoordinator::new(RetryPolicy::from_config(&self.config.retry)).with_context(context.clone());

        let outcome = match coordinator
            .run(|n| attempt.run(url, context.clone().with_attempt(n)))
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                let failed = match &error {
                    CrawlError::Exhausted { attempts, last, .. } => {
                        context.clone().with_attempt(*attempts).with_failure(*last)
                    }
                    _ => context.clone(),
                };
                log_error!(failed, category = error.category(), error = %error, "Crawl failed");
                return Err(error);
            }
        };

        let extraction = outcome.extraction;
        let report = CrawlReport {
            start_time,
            end_time: Local::now(),
            total_items: extraction.found,
            valid_items: extraction.records.len(),
            errors: extraction.drop_messages(),
        };

        let counted = context
            .clone()
            .with_attempt(outcome.attempts)
            .with_counts(extraction.records.len(), extraction.dropped_count());
        if extraction.dropped_count() > 0 {
            log_warn!(
                counted,
                "Dropped {} of {} rows during extraction",
                extraction.dropped_count(),
                extraction.found
            );
        }

        let exports = self
            .export_manager
            .export_all(&extraction.records, &report, formats)
            .await;
        let summary = RunSummary::from_records(&extraction.records);

        log_info!(
            counted,
            layout = %extraction.layout,
            exported = exports.iter().filter(|e| e.result.is_ok()).count(),
            "Crawl finished"
        );

        Ok(RunOutcome {
            run_id: self.run_id.clone(),
            url: url.to_string(),
            layout: extraction.layout,
            records: extraction.records,
            report,
            summary,
            attempts: outcome.attempts,
            history: outcome.history,
            exports,
        })
    }

    /// Describe the page structure without extracting
    pub async fn analyze(&self, url: Option<&str>) -> CrawlResult<StructureReport> {
        let url = url.unwrap_or(self.config.crawler.target_url.as_str());
        validate_target_url(url)?;
        let output_dir = &self.config.export.output_directory;

        let fetcher = PageFetcher::new(
            Arc::clone(&self.launcher),
            FetchOptions::from_config(&self.config.crawler, output_dir).lenient(),
        );
        let analyzer = PageAnalyzer::new(fetcher, Arc::clone(&self.detector), output_dir.clone())?;
        analyzer.analyze(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExhaustionReason, FailureKind};
    use crate::export::read_csv;
    use crate::scraper::{FixtureLauncher, FixtureResponse};

    const TOOLTIP_PAGE: &str = r#"<html><body><div class="cont-area">
        <h2 class="h-page">갤럭시 S24</h2>
        <div class="tooltip-ly disclosure">
          <span>공시지원금</span><span class="d-price"><span class="depth-num">516,000</span>원</span>
          <span>추가지원금</span><span class="d-price"><span class="depth-num">645,400</span>원</span>
        </div></div></body></html>"#;

    fn config(dir: &Path, max_retries: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.crawler.explicit_wait_seconds = 1;
        config.crawler.implicit_wait_seconds = 1;
        config.crawler.settle_delay_ms = 0;
        config.retry.max_retries = max_retries;
        config.retry.retry_delay_seconds = 0.0;
        config.retry.max_delay_seconds = 0.0;
        config.export.output_directory = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_run_recovers_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FixtureLauncher::new(vec![
            FixtureResponse::NavigationError("net::ERR_CONNECTION_RESET".to_string()),
            FixtureResponse::Page(TOOLTIP_PAGE.to_string()),
        ]));
        let crawler = FeeCrawler::with_launcher(config(dir.path(), 3), launcher.clone()).unwrap();

        let outcome = crawler.run(None, &[ExportFormat::Csv, ExportFormat::Json]).await.unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.layout, "disclosure-tooltip");
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].total_support_fee(), 1_161_400);
        assert_eq!(outcome.report.valid_items, 1);
        assert_eq!(outcome.failed_exports(), 0);
        assert_eq!(launcher.stats().max_open(), 1);
        assert_eq!(launcher.stats().closed(), 2);

        let csv = outcome.exported_files()[0].to_path_buf();
        assert_eq!(read_csv(&csv).await.unwrap(), outcome.records);
    }

    #[tokio::test]
    async fn test_unmatched_page_exhausts_without_exporting() {
        let dir = tempfile::tempdir().unwrap();
        let page = "<html><body><div class=\"cont-area\">점검 중입니다</div></body></html>";
        let launcher = Arc::new(FixtureLauncher::html(page));
        let crawler = FeeCrawler::with_launcher(config(dir.path(), 2), launcher.clone()).unwrap();

        match crawler.run(None, &ExportFormat::all()).await {
            Err(CrawlError::Exhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last, FailureKind::StructureMismatch);
            }
            other => panic!("expected Exhausted, got {:?}", other.map(|o| o.records.len())),
        }
        assert_eq!(launcher.stats().launched(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.crawler.target_url = "not a url".to_string();
        let launcher = Arc::new(FixtureLauncher::html("<p></p>"));
        assert!(matches!(
            FeeCrawler::with_launcher(config, launcher),
            Err(CrawlError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_deadline_releases_stalled_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 3);
        config.crawler.implicit_wait_seconds = 30;
        config.retry.total_timeout_seconds = Some(1);
        let launcher = Arc::new(FixtureLauncher::new(vec![FixtureResponse::Stall]));
        let crawler = FeeCrawler::with_launcher(config, launcher.clone()).unwrap();

        match crawler.run(None, &[ExportFormat::Json]).await {
            Err(CrawlError::Exhausted { attempts, last, reason, .. }) => {
                assert_eq!(attempts, 1);
                assert_eq!(last, FailureKind::FetchTimeout);
                assert_eq!(reason, ExhaustionReason::Deadline);
            }
            other => panic!("expected Exhausted, got {:?}", other.map(|o| o.records.len())),
        }

        let stats = launcher.stats();
        assert_eq!(stats.launched(), 1);
        assert_eq!(stats.closed(), 0);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.open(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url_override_fails_without_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FixtureLauncher::html(TOOLTIP_PAGE));
        let crawler = FeeCrawler::with_launcher(config(dir.path(), 3), launcher.clone()).unwrap();

        for url in ["tworld notice", "/notice?prodId=NA00007790", "ftp://m.shop.tworld.co.kr/notice"] {
            assert!(matches!(
                crawler.run(Some(url), &[ExportFormat::Csv]).await,
                Err(CrawlError::Config { .. })
            ));
            assert!(matches!(crawler.analyze(Some(url)).await, Err(CrawlError::Config { .. })));
        }
        assert_eq!(launcher.stats().launched(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_uses_lenient_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FixtureLauncher::html("<html><body><p>loading</p></body></html>"));
        let crawler = FeeCrawler::with_launcher(config(dir.path(), 1), launcher).unwrap();

        let report = crawler.analyze(None).await.unwrap();
        assert!(report.ready_selector.is_none());
        assert!(report.layouts.iter().all(|p| !p.consistent));
    }
}
