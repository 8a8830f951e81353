use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use tldr_harvest::calendar::{month_bounds, BusinessDayResolver, DayKind};
use tldr_harvest::config::Config;
use tldr_harvest::digest::{
    build_http_client, Clock, FetchClient, RateLimiter, SystemClock, TldrHtmlParser,
};
use tldr_harvest::enrich::{
    CommandNarrator, EnrichmentContext, EnrichmentPipeline, EnrichmentSettings, HttpTranslator,
    Narrator, Translator, VoiceSettings,
};
use tldr_harvest::orchestrator::{DayState, Orchestrator, RunError, RunReport, RunSettings};
use tldr_harvest::storage::{Database, StorageError};

const EXIT_DAY_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

/// Get the config directory path (~/.config/tldr-harvest/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("tldr-harvest"))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[derive(Parser, Debug)]
#[command(
    name = "tldr-harvest",
    version,
    about = "Harvest daily newsletter digests into SQLite"
)]
struct Args {
    /// Config file (default: ~/.config/tldr-harvest/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Newsletter type, overriding the config file
    #[arg(long = "type", global = true, value_name = "TYPE")]
    newsletter_type: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every publishing day in a date range
    Run {
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
    },
    /// Process one calendar month
    Month {
        #[arg(long)]
        year: i32,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,
    },
    /// Show recorded day statuses and article counts
    Status {
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
    },
    /// List the publishing days the calendar resolves in a range
    Calendar {
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run_command(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(p) => p.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(t) = &args.newsletter_type {
        config.newsletter_type = t.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn open_database(config: &Config) -> Result<Database> {
    let path = config
        .database_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    Database::open(path)
        .await
        .with_context(|| format!("Failed to open database at {path}"))
}

async fn run_command(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;

    match args.command {
        Command::Run { start, end } => harvest(&config, start, end).await,
        Command::Month { year, month } => {
            let (start, end) = month_bounds(year, month)
                .ok_or_else(|| anyhow::anyhow!("Invalid month {year}-{month:02}"))?;
            harvest(&config, start, end).await
        }
        Command::Status { start, end } => {
            let db = open_database(&config).await?;
            print_status(&db, &config.newsletter_type, start, end).await?;
            db.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Calendar { start, end } => {
            let resolver =
                BusinessDayResolver::for_country(&config.country_code, config.extra_holidays.clone());
            for (date, kind) in resolver.walk(start, end) {
                match kind {
                    DayKind::Publishing => println!("{date}  publishing"),
                    DayKind::Weekend => println!("{date}  weekend"),
                    DayKind::Holiday => println!(
                        "{date}  holiday ({})",
                        resolver.calendar().holiday_name(date).unwrap_or("holiday")
                    ),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_pipeline(config: &Config, client: &reqwest::Client) -> Result<EnrichmentPipeline> {
    let translator: Option<Arc<dyn Translator>> = if config.translation_active() {
        let key = config
            .translation_api_key()
            .ok_or_else(|| anyhow::anyhow!("Translation enabled but no API key configured"))?;
        let translator = HttpTranslator::new(
            client.clone(),
            &config.translation.api_url,
            key,
            Duration::from_secs(config.request_timeout_secs),
        )
        .context("Failed to set up translator")?;
        Some(Arc::new(translator))
    } else {
        None
    };

    let narrator: Option<Arc<dyn Narrator>> = if config.audio.enabled {
        Some(Arc::new(CommandNarrator::new(
            config.audio.command.clone(),
            VoiceSettings {
                voice: config.audio.voice.clone(),
                rate: config.audio.rate,
                volume: config.audio.volume,
            },
        )))
    } else {
        None
    };

    Ok(EnrichmentPipeline::new(
        translator,
        narrator,
        Arc::new(EnrichmentContext::new()),
        EnrichmentSettings {
            audio_dir: config.audio_dir.clone(),
            concurrency: config.enrichment_concurrency,
            stage_retries: config.stage_retries,
            stage_backoff: Duration::from_millis(config.stage_backoff_ms),
        },
    ))
}

async fn harvest(config: &Config, start: NaiveDate, end: NaiveDate) -> Result<ExitCode> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let client = build_http_client(timeout).context("Failed to build HTTP client")?;
    let base_url = Url::parse(&config.base_url).context("Invalid base_url")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = FetchClient::new(
        client.clone(),
        base_url,
        Arc::new(RateLimiter::new(Duration::from_millis(
            config.min_request_interval_ms,
        ))),
        clock.clone(),
        timeout,
    );
    let pipeline = build_pipeline(config, &client)?;
    let resolver = BusinessDayResolver::for_country(&config.country_code, config.extra_holidays.clone());
    let db = open_database(config).await?;

    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        db.clone(),
        resolver,
        Arc::new(source),
        Arc::new(TldrHtmlParser::new()),
        pipeline,
        RunSettings {
            newsletter_type: config.newsletter_type.clone(),
            country_code: config.country_code.to_ascii_uppercase(),
            max_articles: config.max_articles,
            target_language: config.target_language.clone(),
            retry: config.retry_policy(),
            delay_between_days: config.day_delay(),
            retry_failed_days: config.retry_failed_days,
        },
    )
    .with_cancellation(cancel.clone())
    .with_clock(clock);

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current day before stopping");
            signal_cancel.cancel();
        }
    });

    let result = orchestrator.run(start, end).await;
    db.close().await;

    match result {
        Ok(report) => {
            print_report(&report);
            if report.has_failures() {
                Ok(ExitCode::from(EXIT_DAY_FAILED))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(RunError::Storage(StorageError::Unavailable(msg))) => {
            tracing::error!(error = %msg, "Storage unavailable, run aborted");
            eprintln!("Error: storage unavailable: {msg}");
            Ok(ExitCode::from(EXIT_FATAL))
        }
        Err(e) => Err(e).context("Run aborted"),
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Stored {} day(s) ({} articles), {} failed, {} skipped, {} not published, {} deferred, {} already done{}",
        report.stored(),
        report.articles_stored(),
        report.failed(),
        report.skipped(),
        report.not_published(),
        report.deferred(),
        report.already_done(),
        if report.cancelled { " [cancelled]" } else { "" }
    );
    if report.translation_suspended {
        println!(
            "Translation was suspended after the service reported an exhausted quota ({}).",
            report
                .translation_suspension_reason
                .as_deref()
                .unwrap_or("no reason given")
        );
    }
    for day in report.days.iter().filter(|d| d.state == DayState::Failed) {
        println!(
            "  {} failed: {}",
            day.date,
            day.error.as_deref().unwrap_or("unknown error")
        );
    }
}

async fn print_status(db: &Database, newsletter_type: &str, start: NaiveDate, end: NaiveDate) -> Result<()> {
    let days = db
        .list_days(newsletter_type, start, end)
        .await
        .context("Failed to list days")?;
    let counts = db
        .article_counts(newsletter_type, start, end)
        .await
        .context("Failed to count articles")?;

    if days.is_empty() {
        println!("No days recorded for '{newsletter_type}' between {start} and {end}");
        return Ok(());
    }

    println!("{:<12} {:<16} {:>8} {:>9}  last error", "date", "status", "attempts", "articles");
    for day in &days {
        let date = day.date.format("%Y-%m-%d").to_string();
        let articles = counts
            .iter()
            .find(|(d, _)| *d == date)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        println!(
            "{:<12} {:<16} {:>8} {:>9}  {}",
            date,
            day.status,
            day.attempt_count,
            articles,
            day.last_error.as_deref().unwrap_or("")
        );
    }

    let totals = db
        .count_days_by_status(newsletter_type)
        .await
        .context("Failed to count days")?;
    let summary: Vec<String> = totals.iter().map(|(status, n)| format!("{status} {n}")).collect();
    println!("\nAll recorded '{newsletter_type}' days: {}", summary.join(", "));

    let runs = db.recent_runs(1).await.context("Failed to read run history")?;
    if let Some(run) = runs.first() {
        println!(
            "\nLast run #{}: {}..{} stored {} failed {} skipped {}{}",
            run.id,
            run.range_start,
            run.range_end,
            run.days_stored,
            run.days_failed,
            run.days_skipped,
            if run.finished_at.is_none() { " (unfinished)" } else { "" }
        );
    }
    Ok(())
}
