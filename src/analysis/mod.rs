//! Page structure analysis for authoring new layouts
//!
//! Fetches the page without requiring readiness, then reports what a
//! human needs to write a new [`crate::layout::LayoutDescriptor`]: which
//! fee-related classes and tables exist, what amounts and names appear in
//! the text, and how each known layout fares against the page.

use chrono::{DateTime, Local};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::error::{CrawlError, CrawlResult};
use crate::extract::{format_amount, parse_amount};
use crate::layout::{LayoutProbe, PageContext, StructureDetector};
use crate::logging::{LogContext, PerformanceLogger};
use crate::scraper::{LoadedPage, PageFetcher};
use crate::utils::{truncate_text, write_file};

const CLASS_KEYWORDS: [&str; 6] = ["support", "fee", "disclosure", "price", "공시", "지원금"];
const MAX_CANDIDATES: usize = 10;
const MAX_TABLES: usize = 3;

/// Headers of one table on the page
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub index: usize,
    pub headers: Vec<String>,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureReport {
    pub requested_url: String,
    pub final_url: String,
    pub title: Option<String>,
    pub fetched_at: DateTime<Local>,
    pub ready_selector: Option<String>,
    /// Fee-related class names with occurrence counts, most frequent first
    pub classes: Vec<(String, usize)>,
    pub table_count: usize,
    pub tables: Vec<TableSummary>,
    /// Distinct amounts in descending order
    pub amounts: Vec<u64>,
    pub plan_candidates: Vec<String>,
    pub device_candidates: Vec<String>,
    pub has_script_data: bool,
    pub layouts: Vec<LayoutProbe>,
    pub screenshot: Option<PathBuf>,
    pub saved_files: Vec<PathBuf>,
}

struct Patterns {
    amount: Regex,
    plan: Regex,
    device: Regex,
    script_data: Regex,
    any: Selector,
    tables: Selector,
    header_cells: Selector,
    rows: Selector,
}

impl Patterns {
    fn new() -> CrawlResult<Self> {
        let regex = |p: &str| Regex::new(p).map_err(|e| CrawlError::config(format!("invalid pattern {}: {}", p, e)));
        let selector = |css: &str| {
            Selector::parse(css).map_err(|e| CrawlError::config(format!("invalid selector {}: {:?}", css, e)))
        };
        Ok(Self {
            amount: regex(r"([0-9]{1,3}(?:,[0-9]{3})*)\s*원")?,
            plan: regex(r"(?:5GX?|LTE)[^\s]*(?:\s*[가-힣]+)*(?:\s*[0-9]+)?")?,
            device: regex(r"(?:갤럭시|Galaxy|아이폰|iPhone)\s*[A-Za-z가-힣]*\s*[0-9A-Za-z+]*")?,
            script_data: regex(r"_this\.products\s*=")?,
            any: selector("[class]")?,
            tables: selector("table")?,
            header_cells: selector("th")?,
            rows: selector("tr")?,
        })
    }
}

/// Fetches a page and describes its structure
pub struct PageAnalyzer {
    fetcher: PageFetcher,
    detector: Arc<StructureDetector>,
    output_dir: PathBuf,
    patterns: Patterns,
}

impl PageAnalyzer {
    /// `fetcher` should use lenient readiness so unready pages are still captured
    pub fn new(fetcher: PageFetcher, detector: Arc<StructureDetector>, output_dir: impl Into<PathBuf>) -> CrawlResult<Self> {
        Ok(Self {
            fetcher,
            detector,
            output_dir: output_dir.into(),
            patterns: Patterns::new()?,
        })
    }

    pub async fn analyze(&self, url: &str) -> CrawlResult<StructureReport> {
        info!("Analyzing page structure: {}", url);
        let perf = PerformanceLogger::new(LogContext::new("analysis", "analyze").with_url(url));
        let page = self.fetcher.fetch(url).await?;

        let mut report = self.inspect(&page);
        report.saved_files = self.save_debug_files(&page, &report).await;
        perf.finish("Structure analysis finished");
        Ok(report)
    }

    /// Build the report for an already loaded page
    pub fn inspect(&self, page: &LoadedPage) -> StructureReport {
        let document = Html::parse_document(&page.html);
        let url = Url::parse(&page.final_url).ok();
        let context = PageContext::new(&document, url.as_ref());
        let text = visible_text(&document).join("\n");

        let tables: Vec<ElementRef<'_>> = document.select(&self.patterns.tables).collect();

        StructureReport {
            requested_url: page.requested_url.clone(),
            final_url: page.final_url.clone(),
            title: page.title.clone(),
            fetched_at: page.fetched_at,
            ready_selector: page.ready_selector.clone(),
            classes: self.fee_classes(&document),
            table_count: tables.len(),
            tables: tables
                .iter()
                .take(MAX_TABLES)
                .enumerate()
                .map(|(index, table)| TableSummary {
                    index: index + 1,
                    headers: table
                        .select(&self.patterns.header_cells)
                        .map(|th| th.text().collect::<String>().trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect(),
                    rows: table.select(&self.patterns.rows).count(),
                })
                .collect(),
            amounts: self.amounts(&text),
            plan_candidates: candidates(&self.patterns.plan, &text),
            device_candidates: candidates(&self.patterns.device, &text),
            has_script_data: self.patterns.script_data.is_match(&page.html),
            layouts: self.detector.probe(&context),
            screenshot: page.screenshot.clone(),
            saved_files: Vec::new(),
        }
    }

    fn fee_classes(&self, document: &Html) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for element in document.select(&self.patterns.any) {
            for class in element.value().classes() {
                let lower = class.to_lowercase();
                if CLASS_KEYWORDS.iter().any(|k| lower.contains(k)) {
                    *counts.entry(class.to_string()).or_insert(0) += 1;
                }
            }
        }

        let mut classes: Vec<(String, usize)> = counts.into_iter().collect();
        classes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        classes
    }

    fn amounts(&self, text: &str) -> Vec<u64> {
        let distinct: BTreeSet<u64> = self
            .patterns
            .amount
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .filter_map(|m| parse_amount(m.as_str()).ok())
            .collect();
        distinct.into_iter().rev().take(MAX_CANDIDATES).collect()
    }

    async fn save_debug_files(&self, page: &LoadedPage, report: &StructureReport) -> Vec<PathBuf> {
        let stamp = page.fetched_at.format("%Y%m%d_%H%M%S");
        let html_path = self.output_dir.join(format!("debug_source_{}.html", stamp));
        let info_path = self.output_dir.join(format!("debug_info_{}.json", stamp));
        let mut saved = Vec::new();

        match write_file(&html_path, page.html.as_bytes()).await {
            Ok(()) => saved.push(html_path),
            Err(e) => warn!("Failed to save page source: {}", e),
        }

        let mut info = report.clone();
        info.saved_files = saved.clone();
        info.saved_files.push(info_path.clone());
        let written = match serde_json::to_vec_pretty(&info) {
            Ok(json) => write_file(&info_path, &json).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match written {
            Ok(()) => saved.push(info_path),
            Err(e) => warn!("Failed to save page info: {}", e),
        }

        saved
    }
}

/// Trimmed text nodes under `<body>`, skipping script and style content
fn visible_text(document: &Html) -> Vec<&str> {
    document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent().and_then(ElementRef::wrap)?;
            if matches!(parent.value().name(), "script" | "style" | "noscript" | "title" | "head") {
                return None;
            }
            let text: &str = text;
            let text = text.trim();
            (!text.is_empty()).then_some(text)
        })
        .collect()
}

fn candidates(pattern: &Regex, text: &str) -> Vec<String> {
    let distinct: BTreeSet<String> = pattern
        .find_iter(text)
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|c| !c.is_empty() && c.chars().count() < 30)
        .collect();
    distinct.into_iter().take(MAX_CANDIDATES).collect()
}

impl fmt::Display for StructureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);

        writeln!(f, "{}\n페이지 기본 정보\n{}", rule, rule)?;
        writeln!(f, "제목: {}", self.title.as_deref().unwrap_or("-"))?;
        writeln!(f, "URL: {}", self.final_url)?;
        if self.final_url != self.requested_url {
            writeln!(f, "요청 URL: {}", self.requested_url)?;
        }
        writeln!(f, "준비 선택자: {}", self.ready_selector.as_deref().unwrap_or("(none)"))?;
        writeln!(f, "스크립트 상품 데이터: {}", if self.has_script_data { "있음" } else { "없음" })?;

        writeln!(f, "\n{}\nHTML 구조\n{}", rule, rule)?;
        writeln!(f, "공시지원금 관련 클래스:")?;
        if self.classes.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (class, count) in &self.classes {
            writeln!(f, "  .{} ({})", class, count)?;
        }
        writeln!(f, "테이블 수: {}", self.table_count)?;
        for table in &self.tables {
            writeln!(
                f,
                "  테이블 {} ({} rows) 헤더: [{}]",
                table.index,
                table.rows,
                truncate_text(&table.headers.join(", "), 120)
            )?;
        }

        writeln!(f, "\n{}\n데이터 패턴\n{}", rule, rule)?;
        writeln!(f, "발견된 금액 (상위 {}개):", MAX_CANDIDATES)?;
        for (i, amount) in self.amounts.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, format_amount(*amount))?;
        }
        writeln!(f, "요금제 후보:")?;
        for plan in &self.plan_candidates {
            writeln!(f, "  - {}", plan)?;
        }
        writeln!(f, "기기 후보:")?;
        for device in &self.device_candidates {
            writeln!(f, "  - {}", device)?;
        }

        writeln!(f, "\n{}\n레이아웃 검사\n{}", rule, rule)?;
        for probe in &self.layouts {
            let status = match (probe.resolved, probe.consistent) {
                (true, true) => "MATCH",
                (true, false) => "rejected",
                (false, _) => "absent",
            };
            write!(f, "  {:<20} {:<9} rows={}", probe.layout, status, probe.rows)?;
            if let Some(reason) = &probe.reason {
                write!(f, " ({})", reason)?;
            }
            writeln!(f)?;
        }

        if self.screenshot.is_some() || !self.saved_files.is_empty() {
            writeln!(f, "\n{}\n디버그 파일\n{}", rule, rule)?;
            if let Some(path) = &self.screenshot {
                writeln!(f, "  스크린샷: {}", path.display())?;
            }
            for path in &self.saved_files {
                writeln!(f, "  {}", path.display())?;
            }
        }

        Ok(())
    }
}
