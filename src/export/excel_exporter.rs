use std::fmt::Write;
use tracing::debug;

use crate::error::{CrawlError, CrawlResult};
use crate::model::{FeeRecord, FIELD_NAMES};

pub const SHEET_NAME: &str = "공시지원금";

const HEADER: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<?mso-application progid="Excel.Sheet"?>
<Workbook xmlns="urn:schemas-microsoft-com:office:spreadsheet"
          xmlns:o="urn:schemas-microsoft-com:office:office"
          xmlns:x="urn:schemas-microsoft-com:office:excel"
          xmlns:ss="urn:schemas-microsoft-com:office:spreadsheet">
  <Styles>
    <Style ss:ID="header"><Font ss:Bold="1"/></Style>
    <Style ss:ID="amount"><NumberFormat ss:Format="#,##0"/></Style>
  </Styles>
"##;

/// Render records as a single-sheet SpreadsheetML 2003 workbook.
///
/// Spreadsheet tools open it as `.xls`; amounts are typed number cells.
pub fn render_spreadsheet(records: &[FeeRecord]) -> CrawlResult<Vec<u8>> {
    debug!("Rendering {} records as a spreadsheet", records.len());
    write_workbook(records).map_err(|e| CrawlError::export("excel", e))
}

fn write_workbook(records: &[FeeRecord]) -> Result<Vec<u8>, std::fmt::Error> {
    let mut xml = String::with_capacity(HEADER.len() + records.len() * 400);
    xml.push_str(HEADER);
    writeln!(xml, "  <Worksheet ss:Name=\"{}\">", html_escape::encode_double_quoted_attribute(SHEET_NAME))?;
    xml.push_str("    <Table>\n");

    xml.push_str("      <Row>");
    for name in FIELD_NAMES {
        write!(xml, "<Cell ss:StyleID=\"header\"><Data ss:Type=\"String\">{}</Data></Cell>", name)?;
    }
    xml.push_str("</Row>\n");

    for record in records {
        xml.push_str("      <Row>");
        text_cell(&mut xml, record.device_name())?;
        text_cell(&mut xml, record.plan_name())?;
        amount_cell(&mut xml, record.public_support_fee())?;
        amount_cell(&mut xml, record.additional_support_fee())?;
        amount_cell(&mut xml, record.total_support_fee())?;
        text_cell(&mut xml, &record.collected_at().format("%Y-%m-%d %H:%M:%S").to_string())?;
        xml.push_str("</Row>\n");
    }

    xml.push_str("    </Table>\n  </Worksheet>\n</Workbook>\n");
    Ok(xml.into_bytes())
}

fn text_cell(xml: &mut String, value: &str) -> std::fmt::Result {
    write!(
        xml,
        "<Cell><Data ss:Type=\"String\">{}</Data></Cell>",
        html_escape::encode_text(value)
    )
}

fn amount_cell(xml: &mut String, value: u64) -> std::fmt::Result {
    write!(
        xml,
        "<Cell ss:StyleID=\"amount\"><Data ss:Type=\"Number\">{}</Data></Cell>",
        value
    )
}
