use chrono::{DateTime, Local};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

pub mod csv_exporter;
pub mod excel_exporter;
pub mod json_exporter;

pub use csv_exporter::read_csv;
pub use json_exporter::{read_json, JsonDocument};

use crate::config::ExportConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::logging::{LogContext, PerformanceLogger};
use crate::model::{CrawlReport, FeeRecord};

/// Export format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    pub fn all() -> [ExportFormat; 3] {
        [ExportFormat::Csv, ExportFormat::Excel, ExportFormat::Json]
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xls",
            ExportFormat::Json => "json",
        }
    }

    /// Parse a selector such as `csv`, `excel,json` or `all`
    pub fn parse_list(value: &str) -> CrawlResult<Vec<ExportFormat>> {
        let mut formats = Vec::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                return Ok(Self::all().to_vec());
            }
            let format: ExportFormat = part.parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        if formats.is_empty() {
            return Err(CrawlError::config("no export format selected"));
        }
        Ok(formats)
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" | "xls" => Ok(ExportFormat::Excel),
            "json" => Ok(ExportFormat::Json),
            _ => Err(CrawlError::config(format!("Invalid export format: {}", s))),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Excel => write!(f, "excel"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

/// Export statistics
#[derive(Debug, Clone, Serialize)]
pub struct ExportStats {
    pub format: ExportFormat,
    pub file_path: PathBuf,
    pub record_count: usize,
    pub file_size_bytes: u64,
    pub export_duration_ms: u64,
}

/// Result of one requested format
#[derive(Debug)]
pub struct FormatResult {
    pub format: ExportFormat,
    pub result: CrawlResult<ExportStats>,
}

/// Writes one file per format from a single in-memory record set
pub struct ExportManager {
    config: ExportConfig,
}

impl ExportManager {
    pub fn new(config: &ExportConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn output_directory(&self) -> &Path {
        &self.config.output_directory
    }

    /// Export to every format concurrently.
    ///
    /// File names share one timestamp, taken from `report.start_time`. A
    /// failing format is reported in its own entry and never stops the rest.
    pub async fn export_all(
        &self,
        records: &[FeeRecord],
        report: &CrawlReport,
        formats: &[ExportFormat],
    ) -> Vec<FormatResult> {
        if let Err(e) = tokio::fs::create_dir_all(&self.config.output_directory).await {
            error!("Cannot create output directory {}: {}", self.config.output_directory.display(), e);
        }

        let exports = formats.iter().map(|&format| async move {
            let result = self.export(records, report, format, report.start_time).await;
            if let Err(e) = &result {
                error!("Failed to export to {}: {}", format, e);
            }
            FormatResult { format, result }
        });

        join_all(exports).await
    }

    /// Export data to one format
    pub async fn export(
        &self,
        records: &[FeeRecord],
        report: &CrawlReport,
        format: ExportFormat,
        stamp: DateTime<Local>,
    ) -> CrawlResult<ExportStats> {
        let perf = PerformanceLogger::new(LogContext::new("export", format.to_string()));

        let bytes = match format {
            ExportFormat::Csv => csv_exporter::render_csv(records, self.config.csv_bom)?,
            ExportFormat::Excel => excel_exporter::render_spreadsheet(records)?,
            ExportFormat::Json => json_exporter::render_json(records, report)?,
        };

        let (path, mut file) = self.reserve_path(format, stamp).await?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                debug!("Could not remove partial file {}: {}", path.display(), cleanup);
            }
            return Err(CrawlError::export(format.to_string(), e));
        }

        let stats = ExportStats {
            format,
            file_path: path,
            record_count: records.len(),
            file_size_bytes: bytes.len() as u64,
            export_duration_ms: perf.elapsed().as_millis() as u64,
        };
        info!(
            "Export completed: {} records to {} ({} bytes)",
            stats.record_count,
            stats.file_path.display(),
            stats.file_size_bytes
        );
        perf.finish_with_counts("Export finished", records.len(), 0);

        Ok(stats)
    }

    /// Create the output file, never replacing an existing one
    async fn reserve_path(
        &self,
        format: ExportFormat,
        stamp: DateTime<Local>,
    ) -> CrawlResult<(PathBuf, tokio::fs::File)> {
        let base = generate_basename(&self.config.file_prefix, stamp);

        for n in 0..1000u32 {
            let name = match n {
                0 => format!("{}.{}", base, format.extension()),
                n => format!("{}_{}.{}", base, n, format.extension()),
            };
            let path = self.config.output_directory.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CrawlError::export(format.to_string(), e)),
            }
        }

        Err(CrawlError::export(format.to_string(), format!("no free file name for {}", base)))
    }
}

/// `{prefix}_{YYYYMMDD_HHMMSS}`
pub fn generate_basename(prefix: &str, stamp: DateTime<Local>) -> String {
    format!("{}_{}", prefix, stamp.format("%Y%m%d_%H%M%S"))
}
