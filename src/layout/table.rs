use scraper::{ElementRef, Selector};

use super::{element_text, parse_selector, ElementGroups, LayoutDescriptor, PageContext};
use crate::error::CrawlResult;

/// Header keyword match for one column
#[derive(Debug, Clone, Default)]
pub struct ColumnRule {
    pub any_of: Vec<String>,
    pub all_of: Vec<String>,
    pub none_of: Vec<String>,
}

impl ColumnRule {
    pub fn any(words: &[&str]) -> Self {
        Self {
            any_of: words.iter().map(|w| w.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn all(words: &[&str]) -> Self {
        Self {
            all_of: words.iter().map(|w| w.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn excluding(mut self, words: &[&str]) -> Self {
        self.none_of = words.iter().map(|w| w.to_string()).collect();
        self
    }

    fn matches(&self, header: &str) -> bool {
        let header: String = header.split_whitespace().collect();
        let contains = |word: &String| header.contains(&word.split_whitespace().collect::<String>());

        (self.any_of.is_empty() || self.any_of.iter().any(contains))
            && self.all_of.iter().all(contains)
            && !self.none_of.iter().any(contains)
    }

    fn find(&self, headers: &[String]) -> Option<usize> {
        headers.iter().position(|h| self.matches(h))
    }
}

/// Tabular listing located by header keywords
pub struct TableLayout {
    name: String,
    tables: Selector,
    rows: Selector,
    header_cells: Selector,
    cells: Selector,
    device: ColumnRule,
    plan: ColumnRule,
    public: ColumnRule,
    additional: ColumnRule,
    total: ColumnRule,
    empty_markers: Vec<String>,
}

impl TableLayout {
    /// `table.disclosure-list` style listing; also accepts any table with matching headers
    pub fn disclosure_table() -> CrawlResult<Self> {
        Ok(Self {
            name: "disclosure-table".to_string(),
            tables: parse_selector("table")?,
            rows: parse_selector("tr")?,
            header_cells: parse_selector("th")?,
            cells: parse_selector("td")?,
            device: ColumnRule::any(&["상품명", "기기명", "모델명", "단말기"]),
            plan: ColumnRule::any(&["요금제"]),
            public: ColumnRule::all(&["공시지원금"]).excluding(&["전환"]),
            additional: ColumnRule::all(&["추가", "지원금"]),
            total: ColumnRule::any(&["합계", "총지원금", "총 지원금"]),
            empty_markers: vec!["데이터가 없습니다".to_string()],
        })
    }

    fn headers(&self, table: &ElementRef<'_>) -> Option<Vec<String>> {
        table
            .select(&self.rows)
            .find(|row| row.select(&self.header_cells).next().is_some())
            .map(|row| row.select(&self.header_cells).map(|th| element_text(&th)).collect())
    }

    fn is_empty_notice(&self, cells: &[String]) -> bool {
        cells.len() == 1
            || cells
                .iter()
                .any(|c| self.empty_markers.iter().any(|m| c.contains(m.as_str())))
    }
}

impl LayoutDescriptor for TableLayout {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, page: &PageContext<'_>) -> Option<ElementGroups> {
        let plan_fallback = page.query_param("prodNm");
        let mut groups = ElementGroups::default();
        let mut matched_table = false;

        for table in page.document.select(&self.tables) {
            let Some(headers) = self.headers(&table) else {
                continue;
            };
            let (Some(device_col), Some(public_col)) =
                (self.device.find(&headers), self.public.find(&headers))
            else {
                continue;
            };
            let plan_col = self.plan.find(&headers);
            let additional_col = self.additional.find(&headers);
            let total_col = self.total.find(&headers);
            matched_table = true;

            for row in table.select(&self.rows) {
                let cells: Vec<String> = row.select(&self.cells).map(|td| element_text(&td)).collect();
                if cells.is_empty() || self.is_empty_notice(&cells) {
                    continue;
                }

                let cell = |col: usize| cells.get(col).cloned();
                groups
                    .device_names
                    .push(cell(device_col).unwrap_or_default());
                match plan_col {
                    // An empty plan cell stays in place so the row is dropped, not shifted
                    Some(col) => groups.plan_names.push(
                        cell(col)
                            .filter(|p| !p.is_empty())
                            .or_else(|| plan_fallback.clone())
                            .unwrap_or_default(),
                    ),
                    None => groups.plan_names.extend(plan_fallback.clone()),
                }
                groups.public_fees.push(cell(public_col));
                if let Some(col) = additional_col {
                    groups.additional_fees.push(cell(col));
                }
                if let Some(col) = total_col {
                    groups.total_fees.push(cell(col));
                }
            }
        }

        matched_table.then_some(groups)
    }
}
