use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{CrawlError, CrawlResult};
use crate::model::{CrawlReport, FeeRecord};

/// JSON export envelope: run metadata plus the records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDocument {
    pub crawl_info: CrawlReport,
    pub data: Vec<FeeRecord>,
}

#[derive(Serialize)]
struct JsonDocumentRef<'a> {
    crawl_info: &'a CrawlReport,
    data: &'a [FeeRecord],
}

/// Render the export envelope as pretty-printed JSON
pub fn render_json(records: &[FeeRecord], report: &CrawlReport) -> CrawlResult<Vec<u8>> {
    debug!("Rendering {} records as JSON", records.len());

    let document = JsonDocumentRef {
        crawl_info: report,
        data: records,
    };
    serde_json::to_vec_pretty(&document).map_err(|e| CrawlError::export("json", e))
}

/// Read a JSON export back
pub async fn read_json(path: impl AsRef<Path>) -> CrawlResult<JsonDocument> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    serde_json::from_slice(&bytes).map_err(|e| CrawlError::export("json", e))
}
