use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{CrawlError, CrawlResult};
use crate::export::ExportFormat;

/// Storefront origin
pub const BASE_URL: &str = "https://m.shop.tworld.co.kr";

/// 5GX 프라임 notice page, 24-month contract, device change
pub const DEFAULT_TARGET_URL: &str = "https://m.shop.tworld.co.kr/notice?modelNwType=5G&saleMonth=24&dcMthdCd=10&prodId=NA00007790&prodNm=5GX+%ED%94%84%EB%9D%BC%EC%9E%84&saleYn=N&scrbTypCd=31";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub retry: RetryConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Which session backend the page fetcher launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    Browser,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub target_url: String,
    pub backend: FetchBackend,
    pub headless: bool,
    /// Upper bound for any single browser command
    pub implicit_wait_seconds: u64,
    /// Upper bound for the readiness wait
    pub explicit_wait_seconds: u64,
    /// When false, a page that never shows a readiness selector is captured anyway
    pub require_ready: bool,
    pub readiness_selectors: Vec<String>,
    pub scroll_passes: u32,
    pub settle_delay_ms: u64,
    pub user_agent: String,
    pub chrome_args: Vec<String>,
    pub chrome_path: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub screenshot: bool,
    pub debug: bool,
}

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    pub backoff: BackoffStrategy,
    pub max_delay_seconds: f64,
    pub jitter: bool,
    pub total_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_directory: PathBuf,
    pub file_prefix: String,
    pub formats: Vec<ExportFormat>,
    /// Prefix CSV output with a UTF-8 BOM so spreadsheet tools detect Korean text
    pub csv_bom: bool,
}

/// Log verbosity as exposed to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive understood by `EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(CrawlError::config(format!("unknown log level: {}", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_directive().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub json_format: bool,
    pub max_files: usize,
    pub log_directory: PathBuf,
    pub include_targets: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            backend: FetchBackend::Browser,
            headless: true,
            implicit_wait_seconds: 10,
            explicit_wait_seconds: 20,
            require_ready: true,
            readiness_selectors: vec![
                ".cont-area".to_string(),
                "table.disclosure-list".to_string(),
                ".disclosure-list".to_string(),
                "div.tooltip-ly.disclosure".to_string(),
                "[class*='support']".to_string(),
                "[class*='fee']".to_string(),
                "[class*='disclosure']".to_string(),
                "table".to_string(),
            ],
            scroll_passes: 5,
            settle_delay_ms: 2000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                "--disable-gpu".to_string(),
            ],
            chrome_path: None,
            window_width: 1920,
            window_height: 1080,
            screenshot: false,
            debug: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 2.0,
            backoff: BackoffStrategy::Exponential,
            max_delay_seconds: 30.0,
            jitter: false,
            total_timeout_seconds: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("data"),
            file_prefix: "tworld_fee".to_string(),
            formats: ExportFormat::all().to_vec(),
            csv_bom: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file_enabled: true,
            console_enabled: true,
            json_format: false,
            max_files: 7,
            log_directory: PathBuf::from("logs"),
            include_targets: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    pub async fn load() -> CrawlResult<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            debug!("No configuration file at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> CrawlResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CrawlError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            CrawlError::config(format!("invalid TOML in {}: {}", path.display(), e))
        })?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save configuration as TOML
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CrawlResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CrawlError::config(format!("cannot serialize configuration: {}", e)))?;
        tokio::fs::write(path, content).await?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> CrawlResult<()> {
        validate_target_url(&self.crawler.target_url)?;

        if self.crawler.implicit_wait_seconds == 0 {
            return Err(CrawlError::config("implicit_wait_seconds must be > 0"));
        }
        if self.crawler.explicit_wait_seconds == 0 {
            return Err(CrawlError::config("explicit_wait_seconds must be > 0"));
        }
        if self.crawler.readiness_selectors.is_empty() {
            return Err(CrawlError::config("at least one readiness selector must be configured"));
        }
        for selector in &self.crawler.readiness_selectors {
            scraper::Selector::parse(selector).map_err(|e| {
                CrawlError::config(format!("invalid readiness selector {:?}: {:?}", selector, e))
            })?;
        }

        let retry = &self.retry;
        if !retry.retry_delay_seconds.is_finite() || retry.retry_delay_seconds < 0.0 {
            return Err(CrawlError::config("retry_delay_seconds must be a non-negative number"));
        }
        if !retry.max_delay_seconds.is_finite() || retry.max_delay_seconds < retry.retry_delay_seconds {
            return Err(CrawlError::config("max_delay_seconds must be >= retry_delay_seconds"));
        }
        if retry.total_timeout_seconds == Some(0) {
            return Err(CrawlError::config("total_timeout_seconds must be > 0 when set"));
        }

        if self.export.formats.is_empty() {
            return Err(CrawlError::config("at least one export format must be selected"));
        }
        let prefix = &self.export.file_prefix;
        if prefix.trim().is_empty() || prefix.contains(['/', '\\']) {
            return Err(CrawlError::config(format!("invalid file_prefix {:?}", prefix)));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Ensure output and log directories exist
    pub async fn ensure_directories(&self) -> CrawlResult<()> {
        let dirs_to_create = [&self.export.output_directory, &self.logging.log_directory];

        for dir in dirs_to_create {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await?;
                info!("Created directory: {}", dir.display());
            }
        }

        Ok(())
    }
}

/// Parse a crawl target, accepting only http, https and file URLs
pub fn validate_target_url(raw: &str) -> CrawlResult<url::Url> {
    let url = url::Url::parse(raw)
        .map_err(|e| CrawlError::config(format!("target_url {:?} is not a valid URL: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https" | "file") {
        return Err(CrawlError::config(format!(
            "target_url scheme {:?} is not supported",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("kr", "tworld", "fee-crawler")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply overrides from the process environment, after loading `.env` if present
    pub fn apply(config: &mut AppConfig) -> CrawlResult<()> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::apply_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_from<F>(config: &mut AppConfig, lookup: F) -> CrawlResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(headless) = lookup("HEADLESS") {
            config.crawler.headless = parse_bool("HEADLESS", &headless)?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level.parse()?;
        }

        if let Some(url) = lookup("TWORLD_URL") {
            config.crawler.target_url = url;
        }

        if let Some(path) = lookup("CHROME_PATH") {
            config.crawler.chrome_path = Some(PathBuf::from(path));
        }

        if let Some(dir) = lookup("OUTPUT_DIR") {
            config.export.output_directory = PathBuf::from(dir);
        }

        if let Some(value) = lookup("MAX_RETRIES") {
            config.retry.max_retries = parse_number("MAX_RETRIES", &value)?;
        }

        if let Some(value) = lookup("RETRY_DELAY") {
            config.retry.retry_delay_seconds = parse_number("RETRY_DELAY", &value)?;
            if config.retry.max_delay_seconds < config.retry.retry_delay_seconds {
                config.retry.max_delay_seconds = config.retry.retry_delay_seconds;
            }
        }

        if let Some(value) = lookup("IMPLICIT_WAIT") {
            config.crawler.implicit_wait_seconds = parse_number("IMPLICIT_WAIT", &value)?;
        }

        if let Some(value) = lookup("EXPLICIT_WAIT") {
            config.crawler.explicit_wait_seconds = parse_number("EXPLICIT_WAIT", &value)?;
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> CrawlResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(CrawlError::config(format!("{} must be true or false, got {:?}", key, other))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> CrawlResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CrawlError::config(format!("{} must be a number, got {:?}", key, value)))
}
