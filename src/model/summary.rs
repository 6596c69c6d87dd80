use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::FeeRecord;
use crate::extract::format_amount;

/// Average and maximum of one amount column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeStats {
    pub average: f64,
    pub max: u64,
}

impl FeeStats {
    fn from_values(values: impl Iterator<Item = u64> + Clone) -> Option<Self> {
        let count = values.clone().count();
        if count == 0 {
            return None;
        }
        let sum: u128 = values.clone().map(u128::from).sum();
        let max = values.max().unwrap_or(0);
        Some(Self {
            average: sum as f64 / count as f64,
            max,
        })
    }
}

/// Console summary of one crawl's records
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_records: usize,
    /// Record counts per device, most frequent first
    pub by_device: Vec<(String, usize)>,
    pub by_manufacturer: Vec<(String, usize)>,
    pub public_support_fee: Option<FeeStats>,
    pub additional_support_fee: Option<FeeStats>,
    pub total_support_fee: Option<FeeStats>,
}

impl RunSummary {
    pub fn from_records(records: &[FeeRecord]) -> Self {
        let mut by_device: HashMap<&str, usize> = HashMap::new();
        let mut by_manufacturer: HashMap<&str, usize> = HashMap::new();
        for record in records {
            *by_device.entry(record.device_name()).or_insert(0) += 1;
            *by_manufacturer.entry(record.manufacturer()).or_insert(0) += 1;
        }

        Self {
            total_records: records.len(),
            by_device: ranked(by_device),
            by_manufacturer: ranked(by_manufacturer),
            public_support_fee: FeeStats::from_values(records.iter().map(|r| r.public_support_fee())),
            additional_support_fee: FeeStats::from_values(
                records.iter().map(|r| r.additional_support_fee()),
            ),
            total_support_fee: FeeStats::from_values(records.iter().map(|r| r.total_support_fee())),
        }
    }
}

fn ranked(counts: HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total records: {}", self.total_records)?;

        if !self.by_device.is_empty() {
            writeln!(f, "Records per device:")?;
            for (device, count) in &self.by_device {
                writeln!(f, "  {:<30} {}", device, count)?;
            }
        }

        if !self.by_manufacturer.is_empty() {
            let parts: Vec<String> = self
                .by_manufacturer
                .iter()
                .map(|(name, count)| format!("{} {}", name, count))
                .collect();
            writeln!(f, "Manufacturers: {}", parts.join(", "))?;
        }

        let columns = [
            ("Public support", &self.public_support_fee),
            ("Additional support", &self.additional_support_fee),
            ("Total support", &self.total_support_fee),
        ];
        for (label, stats) in columns {
            if let Some(stats) = stats {
                writeln!(
                    f,
                    "{:<20} avg {}  max {}",
                    label,
                    format_amount(stats.average.round() as u64),
                    format_amount(stats.max)
                )?;
            }
        }

        Ok(())
    }
}

/// Run metadata written alongside the data in the JSON export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    /// Candidate rows seen on the page
    pub total_items: usize,
    /// Rows that became records
    pub valid_items: usize,
    pub errors: Vec<String>,
}

impl CrawlReport {
    pub fn dropped_items(&self) -> usize {
        self.total_items.saturating_sub(self.valid_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(device: &str, public: u64, additional: u64) -> FeeRecord {
        let at = Local.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap();
        FeeRecord::new(device, "5GX 프라임", public, additional, None, at).unwrap()
    }

    #[test]
    fn test_summary_counts_and_stats() {
        let records = vec![
            record("갤럭시 S24", 500_000, 75_000),
            record("갤럭시 S24", 300_000, 45_000),
            record("iPhone 15", 100_000, 0),
        ];
        let summary = RunSummary::from_records(&records);

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.by_device[0], ("갤럭시 S24".to_string(), 2));
        assert_eq!(summary.by_manufacturer[0], ("삼성".to_string(), 2));

        let public = summary.public_support_fee.unwrap();
        assert_eq!(public.max, 500_000);
        assert_eq!(public.average, 300_000.0);
        assert_eq!(summary.total_support_fee.unwrap().max, 575_000);

        let text = summary.to_string();
        assert!(text.contains("Total records: 3"));
        assert!(text.contains("500,000원"));
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::from_records(&[]);
        assert_eq!(summary.total_records, 0);
        assert!(summary.public_support_fee.is_none());
        assert!(summary.to_string().contains("Total records: 0"));
    }
}
