use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use sheetcache::cli::{Cli, Command};
use sheetcache::{
    CacheConfig, CacheRegistry, CellCache, CellRef, Credential, CredentialPool, MemoryRemote, RateLimitedExecutor,
    SheetsClient,
};

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    let level = match log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            other => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to WARN", other);
                tracing::Level::WARN
            }
        },
        None => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

/// Registry whose remote side never leaves the machine
fn offline_registry(config: &CacheConfig) -> Result<CacheRegistry> {
    let pool = CredentialPool::new(vec![Credential::new("offline", "")])?;
    let executor = RateLimitedExecutor::new(Arc::new(pool));
    Ok(CacheRegistry::new(
        &config.cache_dir,
        Arc::new(executor),
        Arc::new(MemoryRemote::new()),
    ))
}

fn open_cache(cli: &Cli, config: &CacheConfig) -> Result<Arc<CellCache>> {
    let registry = if cli.offline {
        offline_registry(config)?
    } else {
        let remote = Arc::new(SheetsClient::new(&config.api_url)?);
        CacheRegistry::from_config(config, remote).context("Failed to set up remote access")?
    };

    let cache = registry.get_or_create(&cli.table_id, &cli.table_name);
    if cli.offline && !cache.rehydrate()? {
        eyre::bail!("No local snapshot at {}", cache.snapshot_path().display());
    }
    Ok(cache)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = CacheConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(table_id = %cli.table_id, table_name = %cli.table_name, "sheetcache starting");

    let cache = open_cache(&cli, &config)?;

    debug!(command = ?cli.command, "main: dispatching command");
    match &cli.command {
        Command::Get { cell } => match cache.get_value(cell)? {
            Some(value) => println!("{}", value),
            None => println!("{}", "(blank)".dimmed()),
        },
        Command::Range { range } => {
            for row in cache.get_range(range)? {
                let cells: Vec<String> = row.into_iter().map(Option::unwrap_or_default).collect();
                println!("{}", cells.join("\t"));
            }
        }
        Command::Set { cell, value } => {
            cache.update_value(cell, value.as_str())?;
            if cli.offline {
                cache.flush_local()?;
                println!("{} Saved {} locally", "✓".green(), cell.cyan());
            } else {
                cache.flush_to_remote(&[cell.as_str()])?;
                println!("{} Updated {}", "✓".green(), cell.cyan());
            }
        }
        Command::Keys => {
            let (height, width) = cache.dimensions()?;
            for row in 0..height {
                for col in 0..width {
                    let cell = CellRef::new(row, col).to_a1();
                    if let Some(value) = cache.get_value(&cell)? {
                        println!("{} {}", cell.yellow(), value);
                    }
                }
            }
        }
    }

    Ok(())
}
