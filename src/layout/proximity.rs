use regex::Regex;
use scraper::ElementRef;

use super::{ElementGroups, LayoutDescriptor, PageContext};
use crate::error::{CrawlError, CrawlResult};

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Generic fallback: groups currency-looking text with the nearest
/// preceding device-looking text, in document order.
pub struct ProximityLayout {
    device: Regex,
    plan: Regex,
    amount: Regex,
    /// Longest text node taken whole as a device name
    max_device_text: usize,
}

#[derive(Default)]
struct Group {
    device: String,
    plan: Option<String>,
    amounts: Vec<String>,
}

impl ProximityLayout {
    pub fn new() -> CrawlResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| CrawlError::config(format!("invalid pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            device: compile(r"(?:갤럭시|Galaxy|아이폰|iPhone)\s*[A-Za-z0-9]+")?,
            plan: compile(r"(?:5GX?|LTE)\s*[가-힣]+(?:\s*[0-9]+)?")?,
            amount: compile(r"[0-9]{1,3}(?:,[0-9]{3})+\s*원|[0-9]+\s*원")?,
            max_device_text: 40,
        })
    }

    fn text_nodes<'a>(&self, page: &'a PageContext<'_>) -> Vec<&'a str> {
        let Some(body) = page
            .document
            .root_element()
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "body")
        else {
            return Vec::new();
        };

        body.descendants()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                let parent = node.parent().and_then(ElementRef::wrap)?;
                if SKIPPED_ELEMENTS.contains(&parent.value().name()) {
                    return None;
                }
                let text: &str = text;
                let text = text.trim();
                (!text.is_empty()).then_some(text)
            })
            .collect()
    }

    fn device_name(&self, text: &str) -> Option<String> {
        let found = self.device.find(text)?;
        if text.chars().count() <= self.max_device_text && self.amount.find(text).is_none() {
            Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
        } else {
            Some(found.as_str().to_string())
        }
    }
}

impl LayoutDescriptor for ProximityLayout {
    fn name(&self) -> &str {
        "proximity"
    }

    fn resolve(&self, page: &PageContext<'_>) -> Option<ElementGroups> {
        let fallback_plan = page.query_param("prodNm");
        let mut last_plan: Option<String> = None;
        let mut current: Option<Group> = None;
        let mut closed: Vec<Group> = Vec::new();

        for text in self.text_nodes(page) {
            if let Some(device) = self.device_name(text) {
                closed.extend(current.take());
                current = Some(Group {
                    device,
                    plan: last_plan.clone(),
                    amounts: Vec::new(),
                });
            }

            if let Some(plan) = self.plan.find(text) {
                let plan = plan.as_str().to_string();
                last_plan = Some(plan.clone());
                if let Some(group) = current.as_mut() {
                    if group.amounts.is_empty() {
                        group.plan = Some(plan);
                    }
                }
            }

            if let Some(group) = current.as_mut() {
                for amount in self.amount.find_iter(text) {
                    if group.amounts.len() < 2 {
                        group.amounts.push(amount.as_str().to_string());
                    }
                }
            }
        }
        closed.extend(current);

        let mut groups = ElementGroups::default();
        for group in closed.into_iter().filter(|g| !g.amounts.is_empty()) {
            let mut amounts = group.amounts.into_iter();
            groups.device_names.push(group.device);
            groups
                .plan_names
                .extend(group.plan.or_else(|| fallback_plan.clone()));
            groups.public_fees.push(amounts.next());
            groups.additional_fees.push(amounts.next());
        }

        (groups.rows() > 0).then_some(groups)
    }
}
