//! Structure detection: known page layouts tried in priority order
//!
//! Each [`LayoutDescriptor`] resolves its selection rules against a parsed
//! page and returns raw text groups. The [`StructureDetector`] accepts the
//! first descriptor whose groups are internally consistent.

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};
use url::Url;

use crate::error::{CrawlError, CrawlResult};
use crate::scraper::LoadedPage;

pub mod proximity;
pub mod script;
pub mod selector;
pub mod table;

pub use proximity::ProximityLayout;
pub use script::{ScriptDataLayout, ScriptKeys};
pub use selector::{FieldRule, FieldSource, SelectorLayout};
pub use table::{ColumnRule, TableLayout};

/// Parsed page plus the URL it was served from
pub struct PageContext<'a> {
    pub document: &'a Html,
    pub url: Option<&'a Url>,
}

impl<'a> PageContext<'a> {
    pub fn new(document: &'a Html, url: Option<&'a Url>) -> Self {
        Self { document, url }
    }

    /// Decoded query parameter of the page URL
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url?
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// One known page structure
pub trait LayoutDescriptor: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve selection rules against the page. `None` means the layout's
    /// anchor elements are absent altogether.
    fn resolve(&self, page: &PageContext<'_>) -> Option<ElementGroups>;
}

/// Raw text resolved by a layout, one entry per candidate row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ElementGroups {
    pub device_names: Vec<String>,
    pub plan_names: Vec<String>,
    pub public_fees: Vec<Option<String>>,
    /// Empty when the layout has no additional-fee field
    pub additional_fees: Vec<Option<String>>,
    /// Empty when the page carries no independent total
    pub total_fees: Vec<Option<String>>,
}

/// Why a set of groups cannot be turned into records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    Empty,
    CountMismatch { devices: usize, plans: usize, rows: usize },
    ColumnLength { column: &'static str, len: usize, rows: usize },
    NoPublicFees,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("no rows resolved"),
            Self::CountMismatch { devices, plans, rows } => write!(
                f,
                "{} device names vs {} plan names over {} rows",
                devices, plans, rows
            ),
            Self::ColumnLength { column, len, rows } => {
                write!(f, "{} has {} entries for {} rows", column, len, rows)
            }
            Self::NoPublicFees => f.write_str("no public fee text in any row"),
        }
    }
}

impl ElementGroups {
    pub fn rows(&self) -> usize {
        self.public_fees.len()
    }

    /// Structural check a layout must pass before extraction
    pub fn check(&self) -> Result<(), Inconsistency> {
        let rows = self.rows();
        if rows == 0 || self.device_names.is_empty() || self.plan_names.is_empty() {
            return Err(Inconsistency::Empty);
        }
        if self.device_names.len() != self.plan_names.len() || self.device_names.len() != rows {
            return Err(Inconsistency::CountMismatch {
                devices: self.device_names.len(),
                plans: self.plan_names.len(),
                rows,
            });
        }
        for (column, len) in [
            ("additional_fees", self.additional_fees.len()),
            ("total_fees", self.total_fees.len()),
        ] {
            if len != 0 && len != rows {
                return Err(Inconsistency::ColumnLength { column, len, rows });
            }
        }
        if self.public_fees.iter().all(Option::is_none) {
            return Err(Inconsistency::NoPublicFees);
        }
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.check().is_ok()
    }

    pub fn additional_fee(&self, row: usize) -> Option<&str> {
        self.additional_fees.get(row).and_then(|v| v.as_deref())
    }

    pub fn total_fee(&self, row: usize) -> Option<&str> {
        self.total_fees.get(row).and_then(|v| v.as_deref())
    }
}

/// The layout that matched and its resolved groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedLayout {
    pub layout: String,
    pub groups: ElementGroups,
}

/// Per-layout result used by the structure analysis report
#[derive(Debug, Clone, Serialize)]
pub struct LayoutProbe {
    pub layout: String,
    pub resolved: bool,
    pub rows: usize,
    pub consistent: bool,
    pub reason: Option<String>,
}

/// Ordered list of layouts; the first consistent one wins
pub struct StructureDetector {
    layouts: Vec<Box<dyn LayoutDescriptor>>,
}

impl StructureDetector {
    /// Detector with the built-in layouts, most specific first
    pub fn new() -> CrawlResult<Self> {
        Ok(Self::with_layouts(vec![
            Box::new(ScriptDataLayout::products()?),
            Box::new(SelectorLayout::disclosure_tooltip()?),
            Box::new(TableLayout::disclosure_table()?),
            Box::new(ProximityLayout::new()?),
        ]))
    }

    pub fn with_layouts(layouts: Vec<Box<dyn LayoutDescriptor>>) -> Self {
        Self { layouts }
    }

    /// Append a layout with the lowest priority
    pub fn push(&mut self, layout: Box<dyn LayoutDescriptor>) {
        self.layouts.push(layout);
    }

    pub fn layout_names(&self) -> Vec<String> {
        self.layouts.iter().map(|l| l.name().to_string()).collect()
    }

    /// Select the first layout whose groups pass the consistency check
    pub fn detect(&self, page: &LoadedPage) -> CrawlResult<DetectedLayout> {
        let document = Html::parse_document(&page.html);
        let url = Url::parse(&page.final_url).ok();
        let context = PageContext::new(&document, url.as_ref());
        self.detect_in(&context)
    }

    pub fn detect_in(&self, context: &PageContext<'_>) -> CrawlResult<DetectedLayout> {
        for layout in &self.layouts {
            let Some(groups) = layout.resolve(context) else {
                debug!(layout = layout.name(), "Layout did not resolve");
                continue;
            };

            match groups.check() {
                Ok(()) => {
                    info!(layout = layout.name(), rows = groups.rows(), "Layout matched");
                    return Ok(DetectedLayout {
                        layout: layout.name().to_string(),
                        groups,
                    });
                }
                Err(reason) => {
                    debug!(layout = layout.name(), %reason, "Layout rejected");
                }
            }
        }

        Err(CrawlError::StructureMismatch {
            tried: self.layout_names(),
        })
    }

    /// Resolve every layout without stopping at the first match
    pub fn probe(&self, context: &PageContext<'_>) -> Vec<LayoutProbe> {
        self.layouts
            .iter()
            .map(|layout| match layout.resolve(context) {
                Some(groups) => {
                    let check = groups.check();
                    LayoutProbe {
                        layout: layout.name().to_string(),
                        resolved: true,
                        rows: groups.rows(),
                        consistent: check.is_ok(),
                        reason: check.err().map(|r| r.to_string()),
                    }
                }
                None => LayoutProbe {
                    layout: layout.name().to_string(),
                    resolved: false,
                    rows: 0,
                    consistent: false,
                    reason: None,
                },
            })
            .collect()
    }
}

/// Parse a CSS selector, reporting failures as configuration errors
pub(crate) fn parse_selector(css: &str) -> CrawlResult<Selector> {
    Selector::parse(css)
        .map_err(|e| CrawlError::config(format!("invalid selector {:?}: {:?}", css, e)))
}

/// Element text with whitespace runs collapsed to single spaces
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(devices: &[&str], plans: &[&str], public: &[Option<&str>]) -> ElementGroups {
        ElementGroups {
            device_names: devices.iter().map(|s| s.to_string()).collect(),
            plan_names: plans.iter().map(|s| s.to_string()).collect(),
            public_fees: public.iter().map(|s| s.map(str::to_string)).collect(),
            ..Default::default()
        }
    }

    /// Layout returning fixed groups, for exercising detector ordering
    struct FixedLayout {
        name: &'static str,
        groups: Option<ElementGroups>,
    }

    impl LayoutDescriptor for FixedLayout {
        fn name(&self) -> &str {
            self.name
        }

        fn resolve(&self, _page: &PageContext<'_>) -> Option<ElementGroups> {
            self.groups.clone()
        }
    }

    #[test]
    fn test_consistency_check() {
        let ok = groups(&["갤럭시 S24"], &["5GX 프라임"], &[Some("500,000원")]);
        assert!(ok.is_consistent());

        let unequal = groups(&["갤럭시 S24", "iPhone 15"], &["5GX 프라임"], &[Some("1"), Some("2")]);
        assert!(matches!(unequal.check(), Err(Inconsistency::CountMismatch { .. })));

        let no_fees = groups(&["갤럭시 S24"], &["5GX 프라임"], &[None]);
        assert_eq!(no_fees.check(), Err(Inconsistency::NoPublicFees));

        assert_eq!(ElementGroups::default().check(), Err(Inconsistency::Empty));

        let mut short_column = ok.clone();
        short_column.additional_fees = vec![None, None];
        assert!(matches!(short_column.check(), Err(Inconsistency::ColumnLength { .. })));
    }

    #[test]
    fn test_unequal_counts_fall_through_to_next_layout() {
        let detector = StructureDetector::with_layouts(vec![
            Box::new(FixedLayout { name: "absent", groups: None }),
            Box::new(FixedLayout {
                name: "unequal",
                groups: Some(groups(&["A", "B"], &["P"], &[Some("1"), Some("2")])),
            }),
            Box::new(FixedLayout {
                name: "good",
                groups: Some(groups(&["A"], &["P"], &[Some("1")])),
            }),
        ]);

        let document = Html::parse_document("<html></html>");
        let detected = detector.detect_in(&PageContext::new(&document, None)).unwrap();
        assert_eq!(detected.layout, "good");

        let probes = detector.probe(&PageContext::new(&document, None));
        assert!(!probes[0].resolved);
        assert!(probes[1].resolved && !probes[1].consistent);
        assert!(probes[2].consistent);
    }

    #[test]
    fn test_blank_page_is_structure_mismatch() {
        let detector = StructureDetector::new().unwrap();
        let page = LoadedPage::from_html(
            "https://m.shop.tworld.co.kr/notice",
            "<html><body><p>점검 중입니다</p></body></html>",
        );

        match detector.detect(&page) {
            Err(CrawlError::StructureMismatch { tried }) => {
                assert_eq!(tried, detector.layout_names());
                assert_eq!(tried.len(), 4);
            }
            other => panic!("expected StructureMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_query_param_is_decoded() {
        let document = Html::parse_document("<html></html>");
        let url = Url::parse(crate::config::DEFAULT_TARGET_URL).unwrap();
        let context = PageContext::new(&document, Some(&url));
        assert_eq!(context.query_param("prodNm").as_deref(), Some("5GX 프라임"));
        assert_eq!(context.query_param("missing"), None);
    }

    #[test]
    fn test_element_text_collapses_whitespace() {
        let document = Html::parse_fragment("<p>  516,000\n   <b>원</b> </p>");
        let p = parse_selector("p").unwrap();
        let element = document.select(&p).next().unwrap();
        assert_eq!(element_text(&element), "516,000 원");
    }
}
