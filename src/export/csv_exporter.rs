use csv::{ReaderBuilder, WriterBuilder};
use std::path::Path;
use tracing::debug;

use crate::error::{CrawlError, CrawlResult};
use crate::model::FeeRecord;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Render records as CSV with a header row of the record field names
pub fn render_csv(records: &[FeeRecord], bom: bool) -> CrawlResult<Vec<u8>> {
    debug!("Rendering {} records as CSV", records.len());

    let mut buffer = Vec::new();
    if bom {
        buffer.extend_from_slice(UTF8_BOM);
    }

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(buffer);
    if records.is_empty() {
        writer
            .write_record(crate::model::FIELD_NAMES)
            .map_err(|e| CrawlError::export("csv", e))?;
    }
    for record in records {
        writer.serialize(record).map_err(|e| CrawlError::export("csv", e))?;
    }

    writer.into_inner().map_err(|e| CrawlError::export("csv", e.error()))
}

/// Read records back from a CSV export
pub async fn read_csv(path: impl AsRef<Path>) -> CrawlResult<Vec<FeeRecord>> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body)
        .deserialize()
        .collect::<Result<Vec<FeeRecord>, _>>()
        .map_err(|e| CrawlError::export("csv", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::sample_records;
    use crate::model::FIELD_NAMES;

    #[test]
    fn test_header_and_bom() {
        let bytes = render_csv(&sample_records(), true).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, FIELD_NAMES.join(","));
        assert!(text.contains("갤럭시 S24,5GX 프라임,516000,645400,1161400,"));
        assert!(text.contains("\"iPhone 15, 128GB\""));
    }

    #[test]
    fn test_empty_export_keeps_header() {
        let bytes = render_csv(&[], false).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap().trim_end(), FIELD_NAMES.join(","));
    }

    #[tokio::test]
    async fn test_read_without_bom() {
        let file = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), render_csv(&sample_records(), false).unwrap())
            .await
            .unwrap();
        assert_eq!(read_csv(file.path()).await.unwrap(), sample_records());
    }
}
