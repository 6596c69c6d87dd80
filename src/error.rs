use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error types for the fee crawler
#[derive(Error, Debug)]
pub enum CrawlError {
    // Page-level errors, recoverable by retry
    #[error("Page not ready after {waited_secs}s: {url}")]
    FetchTimeout { url: String, waited_secs: u64 },

    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("No known layout matched the page (tried: {})", tried.join(", "))]
    StructureMismatch { tried: Vec<String> },

    #[error("Layout matched but no valid records remained ({found} found, {dropped} dropped)")]
    NoDataFound { found: usize, dropped: usize },

    // Per-field and per-format errors, absorbed by callers
    #[error("Cannot parse {field} from {raw:?}")]
    Parse { field: &'static str, raw: String },

    #[error("Export to {format} failed: {message}")]
    Export { format: String, message: String },

    // Fatal errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Crawl gave up after {attempts} attempt(s), last failure: {last} ({reason}): {detail}")]
    Exhausted {
        attempts: u32,
        last: FailureKind,
        reason: ExhaustionReason,
        detail: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Page-level failure kinds the retry coordinator reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchTimeout,
    FetchError,
    StructureMismatch,
    NoDataFound,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchTimeout => "fetch_timeout",
            Self::FetchError => "fetch_error",
            Self::StructureMismatch => "structure_mismatch",
            Self::NoDataFound => "no_data_found",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the coordinator stopped retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    AttemptLimit,
    Deadline,
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptLimit => f.write_str("attempt limit reached"),
            Self::Deadline => f.write_str("total timeout exceeded"),
        }
    }
}

impl CrawlError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a fetch (navigation/network) error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch { message: message.into() }
    }

    /// Create an export error for one format
    pub fn export(format: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Export {
            format: format.into(),
            message: message.to_string(),
        }
    }

    /// Create a per-field parse error
    pub fn parse(field: &'static str, raw: impl Into<String>) -> Self {
        Self::Parse { field, raw: raw.into() }
    }

    /// Page-level failure kind, if this error is one
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::FetchTimeout { .. } => Some(FailureKind::FetchTimeout),
            Self::Fetch { .. } => Some(FailureKind::FetchError),
            Self::StructureMismatch { .. } => Some(FailureKind::StructureMismatch),
            Self::NoDataFound { .. } => Some(FailureKind::NoDataFound),
            _ => None,
        }
    }

    /// Check if the retry coordinator may try again after this error
    pub fn is_recoverable(&self) -> bool {
        self.failure_kind().is_some()
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::FetchTimeout { .. } | Self::Fetch { .. } => "fetch",
            Self::StructureMismatch { .. } => "layout",
            Self::NoDataFound { .. } | Self::Parse { .. } => "extraction",
            Self::Export { .. } => "export",
            Self::Config { .. } => "configuration",
            Self::Exhausted { .. } => "retry",
            Self::Io(_) => "system",
        }
    }
}

/// Result type alias for the crawler
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = CrawlError::config("max_retries out of range");
        assert_eq!(error.category(), "configuration");
        assert!(!error.is_recoverable());
        assert!(error.failure_kind().is_none());
    }

    #[test]
    fn test_recoverable_errors() {
        let timeout = CrawlError::FetchTimeout {
            url: "https://m.shop.tworld.co.kr/notice".to_string(),
            waited_secs: 20,
        };
        assert!(timeout.is_recoverable());
        assert_eq!(timeout.failure_kind(), Some(FailureKind::FetchTimeout));

        let mismatch = CrawlError::StructureMismatch { tried: vec!["proximity".to_string()] };
        assert!(mismatch.is_recoverable());
        assert!(mismatch.to_string().contains("proximity"));

        assert!(!CrawlError::parse("public_support_fee", "abc").is_recoverable());
        assert!(!CrawlError::export("csv", "disk full").is_recoverable());
    }

    #[test]
    fn test_exhausted_message_names_failure_kind() {
        let error = CrawlError::Exhausted {
            attempts: 3,
            last: FailureKind::StructureMismatch,
            reason: ExhaustionReason::AttemptLimit,
            detail: "no layout".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("3 attempt"));
        assert!(message.contains("structure_mismatch"));
        assert_eq!(error.category(), "retry");
    }
}
