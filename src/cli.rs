use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use tworld_fee_crawler::config::{AppConfig, ConfigOverrides, FetchBackend};
use tworld_fee_crawler::core::{FeeCrawler, RunOutcome};
use tworld_fee_crawler::error::CrawlError;
use tworld_fee_crawler::export::ExportFormat;
use tworld_fee_crawler::extract::format_amount;
use tworld_fee_crawler::logging::{init_logging, verbose_level};
use tworld_fee_crawler::scraper::FixtureLauncher;
use tworld_fee_crawler::utils::{format_duration, format_file_size, truncate_text};

const PREVIEW_ROWS: usize = 5;

#[derive(Parser)]
#[command(name = "fee-crawler")]
#[command(about = "T world 공시지원금 crawler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the notice page and export the fee records
    Run(RunArgs),

    /// Dump the page structure to help write new layouts
    Analyze(AnalyzeArgs),
}

/// Flags shared by both commands
#[derive(Args)]
struct PageArgs {
    #[arg(short, long, help = "Target URL (defaults to the configured notice page)")]
    url: Option<String>,

    #[arg(long, help = "Save a full-page screenshot")]
    screenshot: bool,

    #[arg(long, help = "Show the browser window")]
    no_headless: bool,

    #[arg(long, value_name = "FILE", help = "Read a saved HTML page instead of fetching")]
    html_file: Option<PathBuf>,

    #[arg(long, help = "Fetch with plain HTTP instead of a browser")]
    http: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    page: PageArgs,

    #[arg(short, long, default_value = "all", help = "Output formats: csv, excel, json, all (comma separated)")]
    output: String,

    #[arg(long, help = "Save the page source for debugging")]
    debug: bool,
}

#[derive(Args)]
struct AnalyzeArgs {
    #[command(flatten)]
    page: PageArgs,

    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

impl Cli {
    fn page_args(&self) -> &PageArgs {
        match &self.command {
            Commands::Run(args) => &args.page,
            Commands::Analyze(args) => &args.page,
        }
    }
}

/// Run the parsed command line and map the outcome to a process exit code
pub async fn execute(cli: Cli) -> ExitCode {
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\n❌ {:#}", e);
            match e.downcast_ref::<CrawlError>() {
                Some(CrawlError::Config { .. }) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli).await?;

    init_logging(&config.logging).context("failed to initialize logging")?;
    info!("fee-crawler v{}", env!("CARGO_PKG_VERSION"));
    config
        .ensure_directories()
        .await
        .context("failed to create output directories")?;

    let crawler = match &cli.page_args().html_file {
        Some(path) => {
            let launcher = FixtureLauncher::from_file(path).await?;
            FeeCrawler::with_launcher(config, Arc::new(launcher))?
        }
        None => FeeCrawler::new(config)?,
    };

    match cli.command {
        Commands::Run(_) => run(&crawler).await,
        Commands::Analyze(args) => analyze(&crawler, args).await,
    }
}

/// Defaults, then the TOML file, then `.env` and the environment, then flags
async fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path).await?,
        None => AppConfig::load().await?,
    };
    ConfigOverrides::apply(&mut config)?;

    config.logging.level = verbose_level(cli.verbose, config.logging.level);

    let page = cli.page_args();
    if let Some(url) = &page.url {
        config.crawler.target_url = url.clone();
    }
    if page.screenshot {
        config.crawler.screenshot = true;
    }
    if page.no_headless {
        config.crawler.headless = false;
    }
    if page.http {
        config.crawler.backend = FetchBackend::Http;
    }
    if let Commands::Run(args) = &cli.command {
        if args.debug {
            config.crawler.debug = true;
        }
        config.export.formats = ExportFormat::parse_list(&args.output)?;
    }

    config.validate()?;
    Ok(config)
}

async fn run(crawler: &FeeCrawler) -> Result<ExitCode> {
    let started = std::time::Instant::now();
    let formats = crawler.config().export.formats.clone();

    println!("🚀 T world 공시지원금 크롤링 시작");
    let outcome = match crawler.run(None, &formats).await {
        Ok(outcome) => outcome,
        Err(CrawlError::Exhausted { attempts, last, reason, detail }) => {
            eprintln!("\n❌ 크롤링 실패: {} after {} attempt(s) ({})", last, attempts, reason);
            if !detail.is_empty() {
                eprintln!("   {}", detail);
            }
            eprintln!("   페이지 구조를 확인하려면 `fee-crawler analyze` 를 실행하세요.");
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e.into()),
    };

    print_outcome(&outcome);
    println!("\n⏱  {}", format_duration(started.elapsed()));

    if outcome.exported_files().is_empty() {
        eprintln!("\n❌ 저장된 파일이 없습니다 ({} format(s) failed)", outcome.failed_exports());
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(outcome: &RunOutcome) {
    println!(
        "\n✅ {} records via {} ({} attempt(s), {} dropped)",
        outcome.records.len(),
        outcome.layout,
        outcome.attempts,
        outcome.report.dropped_items()
    );

    println!("\n{}", outcome.summary);

    println!("📋 미리보기 (상위 {}개)", PREVIEW_ROWS.min(outcome.records.len()));
    println!("{:<28} {:<18} {:>12} {:>12} {:>12}", "기기", "요금제", "공시지원금", "추가지원금", "합계");
    for record in outcome.records.iter().take(PREVIEW_ROWS) {
        println!(
            "{:<28} {:<18} {:>12} {:>12} {:>12}",
            truncate_text(record.device_name(), 28),
            truncate_text(record.plan_name(), 18),
            format_amount(record.public_support_fee()),
            format_amount(record.additional_support_fee()),
            format_amount(record.total_support_fee()),
        );
    }
    if outcome.records.len() > PREVIEW_ROWS {
        println!("... 외 {}개", outcome.records.len() - PREVIEW_ROWS);
    }

    println!("\n💾 저장된 파일");
    for export in &outcome.exports {
        match &export.result {
            Ok(stats) => println!(
                "  ✓ {:<6} {} ({})",
                export.format,
                stats.file_path.display(),
                format_file_size(stats.file_size_bytes)
            ),
            Err(e) => println!("  ✗ {:<6} {}", export.format, e),
        }
    }
}

async fn analyze(crawler: &FeeCrawler, args: AnalyzeArgs) -> Result<ExitCode> {
    let report = crawler.analyze(None).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report).context("failed to serialize report")?);
    } else {
        println!("{}", report);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "fee-crawler",
            "run",
            "--output",
            "csv,json",
            "--screenshot",
            "--debug",
            "--html-file",
            "saved.html",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.output, "csv,json");
                assert!(args.debug);
                assert!(args.page.screenshot);
                assert_eq!(args.page.html_file, Some(PathBuf::from("saved.html")));
            }
            Commands::Analyze(_) => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_flag_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawler.toml");
        std::fs::write(&path, "").unwrap();

        let cli = Cli::parse_from(["fee-crawler", "--config", path.to_str().unwrap(), "run", "--url", "notice page"]);
        let err = load_config(&cli).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<CrawlError>(), Some(CrawlError::Config { .. })));

        let cli = Cli::parse_from([
            "fee-crawler",
            "--config",
            path.to_str().unwrap(),
            "analyze",
            "--url",
            "https://m.shop.tworld.co.kr/notice?prodId=NA00007790",
        ]);
        let config = load_config(&cli).await.unwrap();
        assert_eq!(config.crawler.target_url, "https://m.shop.tworld.co.kr/notice?prodId=NA00007790");
    }

    #[test]
    fn test_analyze_flags() {
        let cli = Cli::parse_from(["fee-crawler", "--config", "crawler.toml", "analyze", "--json", "--http"]);
        assert_eq!(cli.config, Some(PathBuf::from("crawler.toml")));
        assert!(cli.page_args().http);
        assert!(matches!(cli.command, Commands::Analyze(AnalyzeArgs { json: true, .. })));
    }
}
