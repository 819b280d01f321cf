use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info_span, Instrument};

use usd_rate_scraper::cli::{formatters, Cli, Commands};
use usd_rate_scraper::config::{FileConfig, Settings};
use usd_rate_scraper::diagnostics::ScreenshotWriter;
use usd_rate_scraper::logging;
use usd_rate_scraper::queue::RedisStream;
use usd_rate_scraper::runner::{self, RunOptions};
use usd_rate_scraper::scraping::{parse_bank_rates, ChromeSession};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(cli.settings.overrides(), file)?;

    match cli.command {
        Some(Commands::Parse {
            file,
            source_url,
            json,
        }) => handle_parse(&file, source_url.as_deref().unwrap_or(&settings.target_url), json),
        Some(Commands::Run) | None => {
            logging::init(&settings)?;
            handle_run(&settings)
                .instrument(info_span!("scraper", service = logging::SERVICE_NAME))
                .await
        }
    }
}

/// Parse a saved page and print what a run would publish
fn handle_parse(path: &std::path::Path, source_url: &str, json: bool) -> Result<ExitCode> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rates = parse_bank_rates(&html, source_url)?;

    if json {
        if !rates.is_empty() {
            println!("{}", formatters::format_rates_json(&rates));
        }
    } else {
        print!("{}", formatters::format_rates_table(&rates));
    }
    Ok(ExitCode::SUCCESS)
}

/// One scrape run with a process-scoped queue connection.
///
/// The broker is first contacted at publish time, inside the run.
async fn handle_run(settings: &Settings) -> Result<ExitCode> {
    let mut sink = RedisStream::open(&settings.redis_url)?;

    let options = RunOptions::from(settings);
    let screenshots = ScreenshotWriter::new(&settings.log_dir);
    let launch_config = settings.launch_config();
    let report = runner::run(
        move || ChromeSession::launch(&launch_config),
        &mut sink,
        &options,
        &screenshots,
    )
    .await;

    sink.close().await;

    print!("{}", formatters::format_run_report(&report));
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
