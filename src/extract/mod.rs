//! Record extraction: resolved text groups to validated fee records

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{CrawlError, CrawlResult};
use crate::layout::DetectedLayout;
use crate::model::FeeRecord;

pub mod normalize;

pub use normalize::{format_amount, is_blank_amount, parse_amount};

/// Amounts at or above this are treated as misparsed markup (원)
pub const MAX_PLAUSIBLE_AMOUNT: u64 = 10_000_000;

/// Why a candidate row did not become a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    UnparsableAmount { field: &'static str, raw: String },
    MissingAmount { field: &'static str },
    EmptyName { field: &'static str },
    Implausible { field: &'static str, value: u64 },
    Duplicate,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnparsableAmount { field, raw } => write!(f, "{} {:?} is not an amount", field, raw),
            Self::MissingAmount { field } => write!(f, "{} is missing", field),
            Self::EmptyName { field } => write!(f, "{} is empty", field),
            Self::Implausible { field, value } => write!(f, "{} {} is out of range", field, value),
            Self::Duplicate => f.write_str("duplicate of an earlier row"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    /// Row position on the page, zero-based
    pub index: usize,
    pub reason: DropReason,
}

/// Outcome of extracting one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub layout: String,
    /// Valid records in page order
    pub records: Vec<FeeRecord>,
    /// Candidate rows the layout resolved
    pub found: usize,
    pub dropped: Vec<DroppedRow>,
}

impl Extraction {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    /// Drop reasons rendered for reports
    pub fn drop_messages(&self) -> Vec<String> {
        self.dropped
            .iter()
            .map(|d| format!("row {}: {}", d.index + 1, d.reason))
            .collect()
    }
}

/// Turns resolved element groups into fee records
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    max_amount: u64,
}

impl Default for RecordExtractor {
    fn default() -> Self {
        Self {
            max_amount: MAX_PLAUSIBLE_AMOUNT,
        }
    }
}

impl RecordExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract records in page order. Malformed rows are dropped and counted;
    /// only a page where every row is dropped fails, with `NoDataFound`.
    pub fn extract(&self, detected: &DetectedLayout, collected_at: DateTime<Local>) -> CrawlResult<Extraction> {
        let groups = &detected.groups;
        let found = groups.rows();
        let mut records = Vec::with_capacity(found);
        let mut dropped = Vec::new();
        let mut seen: HashSet<(String, String, u64, u64)> = HashSet::new();

        for index in 0..found {
            match self.build_row(detected, index, collected_at) {
                Ok(record) => {
                    let key = record.dedup_key();
                    let key = (key.0.to_string(), key.1.to_string(), key.2, key.3);
                    if seen.insert(key) {
                        records.push(record);
                    } else {
                        debug!(index, "Dropping duplicate row");
                        dropped.push(DroppedRow { index, reason: DropReason::Duplicate });
                    }
                }
                Err(reason) => {
                    debug!(index, %reason, "Dropping row");
                    dropped.push(DroppedRow { index, reason });
                }
            }
        }

        if records.is_empty() {
            return Err(CrawlError::NoDataFound {
                found,
                dropped: dropped.len(),
            });
        }

        info!(
            layout = %detected.layout,
            found,
            extracted = records.len(),
            dropped = dropped.len(),
            "Extraction finished"
        );

        Ok(Extraction {
            layout: detected.layout.clone(),
            records,
            found,
            dropped,
        })
    }

    fn build_row(
        &self,
        detected: &DetectedLayout,
        index: usize,
        collected_at: DateTime<Local>,
    ) -> Result<FeeRecord, DropReason> {
        let groups = &detected.groups;

        let public = match groups.public_fees.get(index).and_then(|v| v.as_deref()) {
            Some(raw) => self.amount("public_support_fee", raw)?,
            None => return Err(DropReason::MissingAmount { field: "public_support_fee" }),
        };
        // A notice row without a public subsidy is not a subsidy record
        if public == 0 {
            return Err(DropReason::Implausible { field: "public_support_fee", value: 0 });
        }

        let additional = match groups.additional_fee(index) {
            Some(raw) if !is_blank_amount(raw) => self.amount("additional_support_fee", raw)?,
            _ => 0,
        };

        let total = groups.total_fee(index).and_then(|raw| {
            if is_blank_amount(raw) {
                return None;
            }
            match parse_amount(raw) {
                Ok(total) => Some(total),
                Err(_) => {
                    warn!(index, raw, "Ignoring unparsable page total, computing the sum");
                    None
                }
            }
        });

        let device = groups.device_names.get(index).map(String::as_str).unwrap_or_default();
        let plan = groups.plan_names.get(index).map(String::as_str).unwrap_or_default();

        FeeRecord::new(device, plan, public, additional, total, collected_at).map_err(|e| match e {
            CrawlError::Parse { field, .. } if field == "device_name" || field == "plan_name" => {
                DropReason::EmptyName { field }
            }
            CrawlError::Parse { field, raw } => DropReason::UnparsableAmount { field, raw },
            other => DropReason::UnparsableAmount {
                field: "total_support_fee",
                raw: other.to_string(),
            },
        })
    }

    fn amount(&self, field: &'static str, raw: &str) -> Result<u64, DropReason> {
        let value = parse_amount(raw).map_err(|_| DropReason::UnparsableAmount {
            field,
            raw: raw.to_string(),
        })?;
        if value >= self.max_amount {
            return Err(DropReason::Implausible { field, value });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ElementGroups;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()
    }

    fn detected(rows: &[(&str, &str, Option<&str>, Option<&str>)]) -> DetectedLayout {
        let mut groups = ElementGroups::default();
        for (device, plan, public, additional) in rows {
            groups.device_names.push(device.to_string());
            groups.plan_names.push(plan.to_string());
            groups.public_fees.push(public.map(str::to_string));
            groups.additional_fees.push(additional.map(str::to_string));
        }
        DetectedLayout { layout: "test".to_string(), groups }
    }

    #[test]
    fn test_total_is_public_plus_additional() {
        let page = detected(&[("갤럭시 S24", "5GX 프라임", Some("516,000원"), Some("645,400원"))]);
        let extraction = RecordExtractor::new().extract(&page, at()).unwrap();

        let record = &extraction.records[0];
        assert_eq!(record.public_support_fee(), 516_000);
        assert_eq!(record.additional_support_fee(), 645_400);
        assert_eq!(record.total_support_fee(), 1_161_400);
    }

    #[test]
    fn test_malformed_row_does_not_remove_others() {
        let page = detected(&[
            ("갤럭시 S24", "5GX 프라임", Some("500,000원"), Some("75,000원")),
            ("갤럭시 S23", "5GX 프라임", Some("문의"), None),
            ("iPhone 15", "5GX 프라임", Some("450,000원"), Some("-")),
        ]);
        let extraction = RecordExtractor::new().extract(&page, at()).unwrap();

        assert_eq!(extraction.found, 3);
        assert_eq!(extraction.dropped_count(), 1);
        assert_eq!(extraction.records.len(), extraction.found - extraction.dropped_count());
        assert_eq!(extraction.dropped[0].index, 1);
        assert!(matches!(
            extraction.dropped[0].reason,
            DropReason::UnparsableAmount { field: "public_support_fee", .. }
        ));

        let devices: Vec<&str> = extraction.records.iter().map(|r| r.device_name()).collect();
        assert_eq!(devices, vec!["갤럭시 S24", "iPhone 15"]);
        assert_eq!(extraction.records[1].additional_support_fee(), 0);
    }

    #[test]
    fn test_every_row_dropped_is_no_data() {
        let page = detected(&[
            ("", "5GX 프라임", Some("500,000원"), None),
            ("iPhone 15", "5GX 프라임", None, None),
        ]);
        match RecordExtractor::new().extract(&page, at()) {
            Err(CrawlError::NoDataFound { found, dropped }) => {
                assert_eq!(found, 2);
                assert_eq!(dropped, 2);
            }
            other => panic!("expected NoDataFound, got {:?}", other),
        }
    }

    #[test]
    fn test_implausible_and_duplicate_rows_are_dropped() {
        let page = detected(&[
            ("갤럭시 S24", "5GX 프라임", Some("500,000원"), None),
            ("갤럭시 S24", "5GX 프라임", Some("500,000원"), None),
            ("갤럭시 S24", "5GX 프라임", Some("12,000,000원"), None),
            ("갤럭시 S24", "5GX 프라임", Some("0원"), None),
        ]);
        let extraction = RecordExtractor::new().extract(&page, at()).unwrap();

        assert_eq!(extraction.records.len(), 1);
        let reasons: Vec<&DropReason> = extraction.dropped.iter().map(|d| &d.reason).collect();
        assert_eq!(reasons[0], &DropReason::Duplicate);
        assert!(matches!(reasons[1], DropReason::Implausible { value: 12_000_000, .. }));
        assert!(matches!(reasons[2], DropReason::Implausible { value: 0, .. }));
    }

    #[test]
    fn test_page_total_is_respected() {
        let mut page = detected(&[
            ("갤럭시 S24", "5GX 프라임", Some("300,000"), Some("45,000")),
            ("iPhone 15", "5GX 프라임", Some("200,000"), Some("30,000")),
        ]);
        page.groups.total_fees = vec![Some("400,000".to_string()), Some("합계 없음".to_string())];

        let extraction = RecordExtractor::new().extract(&page, at()).unwrap();
        assert_eq!(extraction.records[0].total_support_fee(), 400_000);
        assert_eq!(extraction.records[1].total_support_fee(), 230_000);
    }

    #[test]
    fn test_page_order_is_preserved() {
        let rows: Vec<(String, String)> = (1..=20)
            .map(|i| (format!("Galaxy A{}", i), format!("{},000원", i * 10)))
            .collect();
        let refs: Vec<(&str, &str, Option<&str>, Option<&str>)> = rows
            .iter()
            .map(|(d, p)| (d.as_str(), "LTE 요금제", Some(p.as_str()), None))
            .collect();
        let extraction = RecordExtractor::new().extract(&detected(&refs), at()).unwrap();

        let names: Vec<&str> = extraction.records.iter().map(|r| r.device_name()).collect();
        let expected: Vec<&str> = rows.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(names, expected);
    }
}
