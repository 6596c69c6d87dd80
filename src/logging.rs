use anyhow::Result;
use serde::Serialize;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogLevel, LoggingConfig};
use crate::error::{CrawlError, FailureKind};

/// Initialize logging system
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.as_directive()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers = Vec::new();

    if config.console_enabled {
        let console_layer = fmt::layer()
            .with_target(config.include_targets)
            .with_writer(std::io::stderr)
            .boxed();

        layers.push(console_layer);
    }

    if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("crawler")
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_directory)?;

        let file_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_writer(file_appender)
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_target(config.include_targets)
                .with_writer(file_appender)
                .boxed()
        };

        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .init();

    info!(level = %config.level, "Logging system initialized");
    if config.file_enabled {
        info!("Log directory: {}", config.log_directory.display());
    }

    Ok(())
}

/// Level used when `--verbose` is passed
pub fn verbose_level(verbose: bool, configured: LogLevel) -> LogLevel {
    if verbose {
        LogLevel::Debug
    } else {
        configured
    }
}

/// Structured logging context
#[derive(Debug, Clone, Serialize)]
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub run_id: Option<String>,
    pub url: Option<String>,
    pub attempt: Option<u32>,
    pub record_count: Option<usize>,
    pub dropped_count: Option<usize>,
    pub failure_kind: Option<String>,
    pub duration_ms: Option<u64>,
}

impl LogContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            run_id: None,
            url: None,
            attempt: None,
            record_count: None,
            dropped_count: None,
            failure_kind: None,
            duration_ms: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_counts(mut self, records: usize, dropped: usize) -> Self {
        self.record_count = Some(records);
        self.dropped_count = Some(dropped);
        self
    }

    pub fn with_failure(mut self, kind: FailureKind) -> Self {
        self.failure_kind = Some(kind.to_string());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

/// Structured logging macros
#[macro_export]
macro_rules! log_info {
    ($context:expr, $($arg:tt)+) => {
        tracing::info!(
            component = %$context.component,
            operation = %$context.operation,
            run_id = ?$context.run_id,
            url = ?$context.url,
            attempt = ?$context.attempt,
            record_count = ?$context.record_count,
            dropped_count = ?$context.dropped_count,
            duration_ms = ?$context.duration_ms,
            $($arg)+
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($context:expr, $($arg:tt)+) => {
        tracing::warn!(
            component = %$context.component,
            operation = %$context.operation,
            run_id = ?$context.run_id,
            url = ?$context.url,
            attempt = ?$context.attempt,
            failure_kind = ?$context.failure_kind,
            duration_ms = ?$context.duration_ms,
            $($arg)+
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($context:expr, $($arg:tt)+) => {
        tracing::error!(
            component = %$context.component,
            operation = %$context.operation,
            run_id = ?$context.run_id,
            url = ?$context.url,
            attempt = ?$context.attempt,
            failure_kind = ?$context.failure_kind,
            duration_ms = ?$context.duration_ms,
            $($arg)+
        )
    };
}

/// Times one operation and logs the elapsed duration when finished
pub struct PerformanceLogger {
    context: LogContext,
    start_time: std::time::Instant,
}

impl PerformanceLogger {
    pub fn new(context: LogContext) -> Self {
        Self {
            context,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self, message: &str) {
        let context = self.context.with_duration(self.start_time.elapsed());
        log_info!(context, "{}", message);
    }

    pub fn finish_with_counts(self, message: &str, records: usize, dropped: usize) {
        let context = self
            .context
            .with_duration(self.start_time.elapsed())
            .with_counts(records, dropped);
        log_info!(context, "{}", message);
    }

    pub fn finish_with_error(self, message: &str, error: &CrawlError) {
        let mut context = self.context.with_duration(self.start_time.elapsed());
        if let Some(kind) = error.failure_kind() {
            context = context.with_failure(kind);
        }
        log_warn!(context, category = error.category(), error = %error, "{}", message);
    }
}

/// Short identifier attached to every log line of one run
pub fn generate_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..8])
}
