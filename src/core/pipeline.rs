use chrono::Local;
use std::sync::Arc;
use tracing::{debug, warn};

use super::retry::AttemptResult;
use crate::error::CrawlResult;
use crate::extract::RecordExtractor;
use crate::layout::StructureDetector;
use crate::logging::{LogContext, PerformanceLogger};
use crate::scraper::PageFetcher;

/// One fetch → detect → extract cycle, evaluated as a unit by the retry coordinator
pub struct CrawlAttempt {
    fetcher: PageFetcher,
    detector: Arc<StructureDetector>,
    extractor: RecordExtractor,
}

impl CrawlAttempt {
    pub fn new(fetcher: PageFetcher, detector: Arc<StructureDetector>, extractor: RecordExtractor) -> Self {
        Self {
            fetcher,
            detector,
            extractor,
        }
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    /// Run the unit once.
    ///
    /// Page-level failures come back as `Ok` with the matching
    /// [`AttemptResult`]; anything else (misconfiguration, a missing
    /// browser binary) is returned as `Err` and ends the run.
    pub async fn run(&self, url: &str, context: LogContext) -> CrawlResult<AttemptResult> {
        let perf = PerformanceLogger::new(context.with_url(url));

        match self.execute(url).await {
            Ok(extraction) => {
                perf.finish_with_counts("Attempt unit finished", extraction.records.len(), extraction.dropped_count());
                for message in extraction.drop_messages() {
                    debug!("Dropped {}", message);
                }
                Ok(AttemptResult::Success(extraction))
            }
            Err(error) => {
                perf.finish_with_error("Attempt unit failed", &error);
                match AttemptResult::from_error(&error) {
                    Some(result) => Ok(result),
                    None => Err(error),
                }
            }
        }
    }

    async fn execute(&self, url: &str) -> CrawlResult<crate::extract::Extraction> {
        let page = self.fetcher.fetch(url).await?;
        if page.final_url != page.requested_url {
            warn!(requested = %page.requested_url, landed = %page.final_url, "Page was redirected");
        }

        let detected = self.detector.detect(&page)?;
        self.extractor.extract(&detected, Local::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use crate::error::CrawlError;
    use crate::scraper::{FetchOptions, FixtureLauncher, FixtureResponse};
    use std::path::Path;

    const TABLE_PAGE: &str = r#"<html><body><div class="cont-area">
        <table class="disclosure-list">
          <thead><tr><th>상품명</th><th>공시지원금</th><th>추가지원금</th></tr></thead>
          <tbody>
            <tr><td>갤럭시 S24</td><td>516,000원</td><td>645,400원</td></tr>
            <tr><td>iPhone 15</td><td>문의</td><td>-</td></tr>
            <tr><td>갤럭시 Z 플립5</td><td>650,000원</td><td>97,500원</td></tr>
          </tbody>
        </table></div></body></html>"#;

    fn attempt(responses: Vec<FixtureResponse>) -> CrawlAttempt {
        let mut config = CrawlerConfig::default();
        config.explicit_wait_seconds = 1;
        config.implicit_wait_seconds = 1;
        config.settle_delay_ms = 0;
        let options = FetchOptions::from_config(&config, Path::new("data"));
        let fetcher = PageFetcher::new(Arc::new(FixtureLauncher::new(responses)), options);
        CrawlAttempt::new(fetcher, Arc::new(StructureDetector::new().unwrap()), RecordExtractor::new())
    }

    const URL: &str = "https://m.shop.tworld.co.kr/notice?prodId=NA00007790&prodNm=5GX+%ED%94%84%EB%9D%BC%EC%9E%84";

    #[tokio::test]
    async fn test_successful_unit_keeps_valid_rows() {
        let unit = attempt(vec![FixtureResponse::Page(TABLE_PAGE.to_string())]);

        match unit.run(URL, LogContext::new("test", "attempt")).await.unwrap() {
            AttemptResult::Success(extraction) => {
                assert_eq!(extraction.layout, "disclosure-table");
                assert_eq!(extraction.found, 3);
                assert_eq!(extraction.records.len(), 2);
                assert_eq!(extraction.records[0].total_support_fee(), 1_161_400);
                assert_eq!(extraction.records[0].plan_name(), "5GX 프라임");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_page_level_failures_are_results() {
        let empty = "<html><body><div class=\"cont-area\"><p>안내</p></div></body></html>";
        let unit = attempt(vec![FixtureResponse::Page(empty.to_string())]);
        assert_eq!(
            unit.run(URL, LogContext::new("test", "attempt")).await.unwrap(),
            AttemptResult::StructureMismatch
        );

        let unit = attempt(vec![FixtureResponse::NavigationError("net::ERR_TIMED_OUT".to_string())]);
        assert!(matches!(
            unit.run(URL, LogContext::new("test", "attempt")).await.unwrap(),
            AttemptResult::FetchError(_)
        ));

        let unit = attempt(vec![FixtureResponse::Page("<html><body></body></html>".to_string())]);
        assert_eq!(
            unit.run(URL, LogContext::new("test", "attempt")).await.unwrap(),
            AttemptResult::FetchTimeout
        );
    }

    #[tokio::test]
    async fn test_launch_failure_is_fatal() {
        let unit = attempt(Vec::new());
        let result = unit.run(URL, LogContext::new("test", "attempt")).await;
        assert!(matches!(result, Err(CrawlError::Config { .. })));
    }
}
