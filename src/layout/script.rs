use regex::Regex;
use scraper::Selector;
use serde_json::Value;
use tracing::debug;

use super::{parse_selector, ElementGroups, LayoutDescriptor, PageContext};
use crate::error::{CrawlError, CrawlResult};

/// JSON keys of one product entry
#[derive(Debug, Clone)]
pub struct ScriptKeys {
    pub device: String,
    pub plan: String,
    pub public: String,
    pub additional: Option<String>,
    pub total: Option<String>,
}

/// Product data embedded as a JSON array in an inline script
pub struct ScriptDataLayout {
    name: String,
    pattern: Regex,
    keys: ScriptKeys,
    scripts: Selector,
}

impl ScriptDataLayout {
    /// `_this.products = parseObject([...]);` as served by the notice page
    pub fn products() -> CrawlResult<Self> {
        Self::new(
            "script-products",
            r"(?s)_this\.products\s*=\s*parseObject\((\[.*?\])\);",
            ScriptKeys {
                device: "productNm".to_string(),
                plan: "prodNm".to_string(),
                public: "telecomSaleAmt".to_string(),
                additional: Some("twdSaleAmt".to_string()),
                total: None,
            },
        )
    }

    /// `pattern` must capture the JSON array in group 1
    pub fn new(name: impl Into<String>, pattern: &str, keys: ScriptKeys) -> CrawlResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| CrawlError::config(format!("invalid script pattern: {}", e)))?;
        Ok(Self {
            name: name.into(),
            pattern,
            keys,
            scripts: parse_selector("script")?,
        })
    }

    fn products_in(&self, page: &PageContext<'_>) -> Option<Vec<Value>> {
        for script in page.document.select(&self.scripts) {
            let body: String = script.text().collect();
            let Some(captures) = self.pattern.captures(&body) else {
                continue;
            };
            let Some(array) = captures.get(1) else {
                continue;
            };

            match serde_json::from_str::<Vec<Value>>(array.as_str()) {
                Ok(products) => return Some(products),
                Err(e) => debug!(layout = %self.name, error = %e, "Embedded product JSON is malformed"),
            }
        }
        None
    }
}

impl LayoutDescriptor for ScriptDataLayout {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, page: &PageContext<'_>) -> Option<ElementGroups> {
        let products = self.products_in(page)?;
        let plan_fallback = page.query_param(&self.keys.plan);
        let mut groups = ElementGroups::default();

        for product in &products {
            let device = field(product, &self.keys.device);
            let plan = field(product, &self.keys.plan).or_else(|| plan_fallback.clone());
            if device.is_none() && plan.is_none() {
                continue;
            }

            groups.device_names.extend(device);
            groups.plan_names.extend(plan);
            groups.public_fees.push(field(product, &self.keys.public));
            if let Some(key) = &self.keys.additional {
                groups.additional_fees.push(field(product, key));
            }
            if let Some(key) = &self.keys.total {
                groups.total_fees.push(field(product, key));
            }
        }

        (groups.rows() > 0).then_some(groups)
    }
}

fn field(product: &Value, key: &str) -> Option<String> {
    match product.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
