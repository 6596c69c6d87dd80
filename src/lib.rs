//! T world 공시지원금 crawler
//!
//! Loads the public subsidy notice page, recognizes which of several known
//! page layouts is present, extracts one record per device and plan, and
//! writes the records to CSV, spreadsheet and JSON files:
//! - Page fetching through a headless browser or plain HTTP
//! - Layout detection with a recorded, ordered strategy list
//! - Retry coordination as an explicit state machine
//! - Structure analysis for writing new layouts

pub mod analysis;
pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod extract;
pub mod layout;
pub mod logging;
pub mod model;
pub mod scraper;
pub mod utils;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::core::FeeCrawler;
pub use crate::error::{CrawlError, CrawlResult};
pub use crate::model::FeeRecord;
