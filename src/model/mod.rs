//! Canonical fee record and run-level summaries

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CrawlError, CrawlResult};

pub mod summary;

pub use summary::{CrawlReport, FeeStats, RunSummary};

/// Column order shared by every tabular export
pub const FIELD_NAMES: [&str; 6] = [
    "device_name",
    "plan_name",
    "public_support_fee",
    "additional_support_fee",
    "total_support_fee",
    "collected_at",
];

/// One device/plan pairing with its carrier subsidy amounts (원).
///
/// Records are immutable once built. [`FeeRecord::new`] is the only
/// constructor that enforces the name and total rules; deserialization
/// trusts the file it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecord {
    device_name: String,
    plan_name: String,
    public_support_fee: u64,
    additional_support_fee: u64,
    total_support_fee: u64,
    collected_at: DateTime<Local>,
}

impl FeeRecord {
    /// Build a record from already-normalized amounts.
    ///
    /// When the page supplied its own total and it disagrees with
    /// `public + additional`, the supplied value is kept and a warning is
    /// logged. Without a supplied total the sum is computed.
    pub fn new(
        device_name: impl Into<String>,
        plan_name: impl Into<String>,
        public_support_fee: u64,
        additional_support_fee: u64,
        supplied_total: Option<u64>,
        collected_at: DateTime<Local>,
    ) -> CrawlResult<Self> {
        let device_name = device_name.into().trim().to_string();
        let plan_name = plan_name.into().trim().to_string();

        if device_name.is_empty() {
            return Err(CrawlError::parse("device_name", device_name));
        }
        if plan_name.is_empty() {
            return Err(CrawlError::parse("plan_name", plan_name));
        }

        let computed = public_support_fee
            .checked_add(additional_support_fee)
            .ok_or_else(|| {
                CrawlError::parse(
                    "total_support_fee",
                    format!("{} + {}", public_support_fee, additional_support_fee),
                )
            })?;

        let total_support_fee = match supplied_total {
            Some(total) if total != computed => {
                warn!(
                    device = %device_name,
                    plan = %plan_name,
                    supplied = total,
                    computed,
                    "Page total disagrees with public + additional, keeping page value"
                );
                total
            }
            Some(total) => total,
            None => computed,
        };

        Ok(Self {
            device_name,
            plan_name,
            public_support_fee,
            additional_support_fee,
            total_support_fee,
            collected_at,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn plan_name(&self) -> &str {
        &self.plan_name
    }

    pub fn public_support_fee(&self) -> u64 {
        self.public_support_fee
    }

    pub fn additional_support_fee(&self) -> u64 {
        self.additional_support_fee
    }

    pub fn total_support_fee(&self) -> u64 {
        self.total_support_fee
    }

    pub fn collected_at(&self) -> DateTime<Local> {
        self.collected_at
    }

    /// Manufacturer inferred from the device name
    pub fn manufacturer(&self) -> &'static str {
        let name = self.device_name.to_lowercase();
        if name.contains("갤럭시") || name.contains("galaxy") {
            "삼성"
        } else if name.contains("아이폰") || name.contains("iphone") || name.contains("ipad") {
            "애플"
        } else if name.contains("샤오미") || name.contains("xiaomi") {
            "샤오미"
        } else if name.contains("모토로라") || name.contains("motorola") {
            "모토로라"
        } else {
            "기타"
        }
    }

    /// Identity used for duplicate detection
    pub(crate) fn dedup_key(&self) -> (&str, &str, u64, u64) {
        (
            &self.device_name,
            &self.plan_name,
            self.public_support_fee,
            self.additional_support_fee,
        )
    }
}
