use scraper::{ElementRef, Selector};

use super::{element_text, parse_selector, ElementGroups, LayoutDescriptor, PageContext};
use crate::error::CrawlResult;

/// Where one field's text comes from
pub enum FieldSource {
    /// First match inside the scope element
    Css { selector: Selector, attr: Option<String> },
    /// First match anywhere in the page
    Document { selector: Selector, attr: Option<String> },
    /// A label element whose text starts with `prefix`, then its first
    /// following sibling matching `sibling`, optionally narrowed to `inner`
    LabelledSibling {
        label: Selector,
        prefix: String,
        sibling: Selector,
        inner: Option<Selector>,
    },
    /// Query parameter of the page URL
    QueryParam(String),
    Constant(String),
}

impl FieldSource {
    pub fn css(css: &str) -> CrawlResult<Self> {
        Ok(Self::Css { selector: parse_selector(css)?, attr: None })
    }

    pub fn document(css: &str) -> CrawlResult<Self> {
        Ok(Self::Document { selector: parse_selector(css)?, attr: None })
    }

    pub fn labelled(label: &str, prefix: &str, sibling: &str, inner: Option<&str>) -> CrawlResult<Self> {
        Ok(Self::LabelledSibling {
            label: parse_selector(label)?,
            prefix: prefix.to_string(),
            sibling: parse_selector(sibling)?,
            inner: inner.map(parse_selector).transpose()?,
        })
    }

    fn resolve(&self, page: &PageContext<'_>, scope: &ElementRef<'_>) -> Option<String> {
        let text = match self {
            Self::Css { selector, attr } => scope
                .select(selector)
                .next()
                .and_then(|el| read(&el, attr.as_deref())),
            Self::Document { selector, attr } => page
                .document
                .select(selector)
                .next()
                .and_then(|el| read(&el, attr.as_deref())),
            Self::LabelledSibling { label, prefix, sibling, inner } => scope
                .select(label)
                .filter(|el| element_text(el).starts_with(prefix.as_str()))
                .find_map(|el| {
                    el.next_siblings()
                        .filter_map(ElementRef::wrap)
                        .find(|s| sibling.matches(s))
                })
                .map(|value| {
                    inner
                        .as_ref()
                        .and_then(|inner| value.select(inner).next())
                        .map(|el| element_text(&el))
                        .unwrap_or_else(|| element_text(&value))
                }),
            Self::QueryParam(name) => page.query_param(name),
            Self::Constant(value) => Some(value.clone()),
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

fn read(element: &ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    match attr {
        Some(attr) => element.value().attr(attr).map(|v| v.trim().to_string()),
        None => Some(element_text(element)),
    }
}

/// Ordered fallbacks for one field; the first non-empty source wins
pub struct FieldRule(pub Vec<FieldSource>);

impl FieldRule {
    fn resolve(&self, page: &PageContext<'_>, scope: &ElementRef<'_>) -> Option<String> {
        self.0.iter().find_map(|source| source.resolve(page, scope))
    }
}

/// Declarative layout: one scope element per record, a rule per field
pub struct SelectorLayout {
    name: String,
    scope: Selector,
    device: FieldRule,
    plan: FieldRule,
    public: FieldRule,
    additional: Option<FieldRule>,
    total: Option<FieldRule>,
}

impl SelectorLayout {
    pub fn new(
        name: impl Into<String>,
        scope: &str,
        device: FieldRule,
        plan: FieldRule,
        public: FieldRule,
    ) -> CrawlResult<Self> {
        Ok(Self {
            name: name.into(),
            scope: parse_selector(scope)?,
            device,
            plan,
            public,
            additional: None,
            total: None,
        })
    }

    pub fn with_additional(mut self, rule: FieldRule) -> Self {
        self.additional = Some(rule);
        self
    }

    pub fn with_total(mut self, rule: FieldRule) -> Self {
        self.total = Some(rule);
        self
    }

    /// Disclosure tooltip cards: labelled 공시지원금 / 추가지원금 price spans
    pub fn disclosure_tooltip() -> CrawlResult<Self> {
        let layout = Self::new(
            "disclosure-tooltip",
            "div.tooltip-ly.disclosure",
            FieldRule(vec![
                FieldSource::css(".device-name, .prod-name")?,
                FieldSource::document("h2.h-page")?,
            ]),
            FieldRule(vec![
                FieldSource::css(".plan-name")?,
                FieldSource::QueryParam("prodNm".to_string()),
            ]),
            FieldRule(vec![FieldSource::labelled(
                "span",
                "공시지원금",
                "span.d-price",
                Some("span.depth-num"),
            )?]),
        )?;

        Ok(layout.with_additional(FieldRule(vec![FieldSource::labelled(
            "span",
            "추가지원금",
            "span.d-price",
            Some("span.depth-num"),
        )?])))
    }
}

impl LayoutDescriptor for SelectorLayout {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, page: &PageContext<'_>) -> Option<ElementGroups> {
        let mut groups = ElementGroups::default();

        for scope in page.document.select(&self.scope) {
            let device = self.device.resolve(page, &scope);
            let plan = self.plan.resolve(page, &scope);
            let public = self.public.resolve(page, &scope);
            if device.is_none() && plan.is_none() && public.is_none() {
                continue;
            }

            groups.device_names.extend(device);
            groups.plan_names.extend(plan);
            groups.public_fees.push(public);
            if let Some(rule) = &self.additional {
                groups.additional_fees.push(rule.resolve(page, &scope));
            }
            if let Some(rule) = &self.total {
                groups.total_fees.push(rule.resolve(page, &scope));
            }
        }

        (groups.rows() > 0).then_some(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;
    use url::Url;

    const PAGE: &str = r#"<html><body>
        <h2 class="h-page">갤럭시 S24 Ultra</h2>
        <div class="tooltip-ly disclosure">
          <span class="plan-name">5GX 프라임</span>
          <span>공시지원금</span><span class="d-price"><span class="depth-num">500,000</span>원</span>
          <span>추가지원금 (15%)</span><span class="d-price"><span class="depth-num">75,000</span>원</span>
        </div>
        <div class="tooltip-ly disclosure">
          <span class="device-name">갤럭시 Z Flip6</span>
          <span>공시지원금</span><em>안내</em><span class="d-price"><span class="depth-num">600,000</span>원</span>
        </div>
      </body></html>"#;

    #[test]
    fn test_tooltip_cards() {
        let layout = SelectorLayout::disclosure_tooltip().unwrap();
        let document = Html::parse_document(PAGE);
        let url = Url::parse("https://m.shop.tworld.co.kr/notice?prodNm=5GX+%EB%A0%88%EC%A0%84%EB%93%9C").unwrap();
        let groups = layout.resolve(&PageContext::new(&document, Some(&url))).unwrap();

        assert_eq!(groups.device_names, vec!["갤럭시 S24 Ultra", "갤럭시 Z Flip6"]);
        assert_eq!(groups.plan_names, vec!["5GX 프라임", "5GX 레전드"]);
        assert_eq!(groups.public_fees, vec![Some("500,000".to_string()), Some("600,000".to_string())]);
        assert_eq!(groups.additional_fees, vec![Some("75,000".to_string()), None]);
        assert!(groups.is_consistent());
    }

    #[test]
    fn test_missing_plan_makes_counts_unequal() {
        let layout = SelectorLayout::disclosure_tooltip().unwrap();
        let document = Html::parse_document(PAGE);
        let groups = layout.resolve(&PageContext::new(&document, None)).unwrap();

        assert_eq!(groups.device_names.len(), 2);
        assert_eq!(groups.plan_names.len(), 1);
        assert!(!groups.is_consistent());
    }

    #[test]
    fn test_attribute_and_constant_sources() {
        let document = Html::parse_document(
            r#"<ul><li class="card"><span class="model" data-device="iPhone 15">아이폰</span><b>450,000원</b><i class="sum">517,500원</i></li></ul>"#,
        );
        let layout = SelectorLayout::new(
            "cards",
            "li.card",
            FieldRule(vec![FieldSource::Css {
                selector: parse_selector(".model").unwrap(),
                attr: Some("data-device".to_string()),
            }]),
            FieldRule(vec![FieldSource::Constant("5GX 프라임".to_string())]),
            FieldRule(vec![FieldSource::css("b").unwrap()]),
        )
        .unwrap()
        .with_total(FieldRule(vec![FieldSource::css("i.sum").unwrap()]));

        let groups = layout.resolve(&PageContext::new(&document, None)).unwrap();
        assert_eq!(groups.device_names, vec!["iPhone 15"]);
        assert_eq!(groups.plan_names, vec!["5GX 프라임"]);
        assert_eq!(groups.public_fees, vec![Some("450,000원".to_string())]);
        assert!(groups.additional_fees.is_empty());
        assert_eq!(groups.total_fees, vec![Some("517,500원".to_string())]);
        assert!(groups.is_consistent());
    }
}
