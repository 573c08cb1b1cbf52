use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use std::fs;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

use repricer::cli::{Cli, Command, get_log_path};
use repricer::{
    AuditLedger, BatchScheduler, Config, HttpScraper, MarketplaceClient, RowLoader, RowOutcome, RowProcessor,
    RunSummary,
};
use sheetcache::{CacheRegistry, SheetsClient, TableAddress};

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    let level = match log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            other => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Log to file; stdout is for run summaries
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

fn open_loader(config: &Config) -> Result<Arc<RowLoader>> {
    let remote = Arc::new(SheetsClient::new(&config.cache.api_url)?);
    let registry = CacheRegistry::from_config(&config.cache, remote).context("Failed to set up remote access")?;
    let loader = RowLoader::new(
        Arc::new(registry),
        TableAddress::new(&config.sheet.table_id, &config.sheet.table_name),
        config.layout.clone(),
        config.scheduler.default_row_relax_secs,
    )?;
    Ok(Arc::new(loader))
}

fn build_scheduler(config: &Config, loader: Arc<RowLoader>) -> Result<BatchScheduler> {
    let scraper = Arc::new(HttpScraper::from_config(&config.scraper)?);
    let marketplace = Arc::new(MarketplaceClient::from_config(&config.marketplace)?);
    let ledger = Arc::new(AuditLedger::new(loader.clone()));
    let processor = RowProcessor::new(
        loader,
        scraper,
        marketplace,
        ledger,
        config.scraper.product_base_url.clone(),
    );
    Ok(BatchScheduler::from_config(Arc::new(processor), &config.scheduler))
}

fn print_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        match outcome {
            RowOutcome::Success { index, updated: true, .. } => println!("{} row {}", "✓".green(), index),
            RowOutcome::Success { index, updated: false, .. } => {
                println!("{} row {} {}", "=".cyan(), index, "(unchanged)".dimmed())
            }
            RowOutcome::ValidationFailure { index, message } => {
                println!("{} row {}: {}", "!".yellow(), index, message)
            }
            RowOutcome::ProcessingFailure { index, message } => println!("{} row {}: {}", "✗".red(), index, message),
        }
    }

    println!(
        "{} run {}: {} updated, {} unchanged, {} invalid, {} failed in {} batch(es)",
        "→".cyan(),
        summary.run_id.to_string().dimmed(),
        summary.updated,
        summary.unchanged,
        summary.validation_failures,
        summary.processing_failures,
        summary.batches,
    );
    if summary.abandoned_workers > 0 {
        println!("{} {} worker(s) abandoned", "!".yellow(), summary.abandoned_workers);
    }
    if summary.pending_after_run > 0 {
        println!(
            "{} {} audit note(s) not yet written to the table",
            "!".yellow(),
            summary.pending_after_run
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // CLI > config file > INFO
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| Config::load_log_level(cli.config.as_ref()));
    setup_logging(log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(table_id = %config.sheet.table_id, table_name = %config.sheet.table_name, "repricer starting");

    match cli.command {
        Command::Run { once, rows } => {
            config.validate()?;
            let loader = open_loader(&config)?;
            let scheduler = build_scheduler(&config, loader.clone())?;

            if let Some(rows) = rows {
                loader.refresh()?;
                loader.prefetch(&rows);
                print_summary(&scheduler.run(&rows));
                return Ok(());
            }

            loop {
                match scheduler.run_all() {
                    Ok(summary) => print_summary(&summary),
                    Err(e) => {
                        error!(error = %e, "Run failed");
                        eprintln!("{} Run failed: {}", "✗".red(), e);
                    }
                }
                if once {
                    break;
                }
                info!(relax = ?config.scheduler.round_relax(), "Round finished, relaxing");
                thread::sleep(config.scheduler.round_relax());
            }
        }
        Command::Rows => {
            config.validate_sheet()?;
            let loader = open_loader(&config)?;
            let indexes = loader.run_indexes()?;
            for index in &indexes {
                match loader.load(*index) {
                    Ok(row) => println!("{:>5}  {}  {}", index, row.name, row.mode.to_string().dimmed()),
                    Err(e) => println!("{:>5}  {}", index, e.to_string().yellow()),
                }
            }
            println!("{} {} row(s) flagged", "→".cyan(), indexes.len());
        }
        Command::Show { row } => {
            config.validate_sheet()?;
            let loader = open_loader(&config)?;
            let row = loader.load(row)?;
            print!("{}", serde_yaml::to_string(&row)?);
        }
        Command::Credentials => {
            let remote = Arc::new(SheetsClient::new(&config.cache.api_url)?);
            let registry = CacheRegistry::from_config(&config.cache, remote)?;
            let status = registry.executor().pool().status();
            println!("total:     {}", status.total);
            println!("available: {}", status.available);
            println!("current:   {}", status.current.as_deref().unwrap_or("-"));
            for id in &status.failed {
                println!("{} {}", "failed:".red(), id);
            }
        }
    }

    Ok(())
}
