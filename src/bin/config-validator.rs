//! # Opinions Configuration Validator
//!
//! Loads and validates the scheduler configuration for an environment
//! before a deployment starts workers against it.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use opinions_core::config::{ConfigManager, OpinionsConfig, StorageBackend};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate opinions scheduler configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment whose overlay is applied (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory (default: $OPINIONS_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the full configuration
    All,

    /// Validate and show one section
    Section {
        /// Section name (queues, fetch, ttl, eta, processing, analysis, initiation, storage, logging)
        name: String,
    },

    /// List environments that have an overlay file
    Environments,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Section { name }) => validate_section(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for environment '{}'", cli.environment))
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating opinions configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli)?;
    println!("Config Directory: {}", manager.config_directory().display());
    println!("✅ Configuration loaded and validated");

    let config = manager.config();
    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    } else {
        print_table(config);
    }
    Ok(())
}

fn validate_section(cli: &Cli, name: &str) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let sanitized = manager.debug_config();
    let key = name.to_lowercase().replace('-', "_");
    let Some(section) = sanitized.get(&key) else {
        bail!("Unknown section: {name}");
    };

    println!("✅ Section '{key}' valid");
    println!("{}", serde_json::to_string_pretty(section)?);
    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let dir = cli
        .config_dir
        .clone()
        .or_else(|| std::env::var("OPINIONS_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config"));

    let mut environments = Vec::new();
    for entry in std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(environment) = name
            .strip_prefix("opinions.")
            .and_then(|rest| rest.strip_suffix(".toml"))
        {
            environments.push(environment.to_string());
        }
    }
    environments.sort();

    println!("📋 Environments with overlays in {}:", dir.display());
    for environment in environments {
        println!("  • {environment}");
    }
    Ok(())
}

fn print_table(config: &OpinionsConfig) {
    let rows = [
        ("queues.fetch_queue", config.queues.fetch_queue.clone()),
        ("queues.processing_queue", config.queues.processing_queue.clone()),
        ("queues.batch_size", config.queues.batch_size.to_string()),
        (
            "queues.visibility_timeout_seconds",
            config.queues.visibility_timeout_seconds.to_string(),
        ),
        ("queues.max_fetch_deliveries", config.queues.max_fetch_deliveries.to_string()),
        ("fetch.max_attempts", config.fetch.max_attempts.to_string()),
        ("fetch.retry_delay_ms", config.fetch.retry_delay_ms.to_string()),
        (
            "fetch.min_request_interval_ms",
            config.fetch.min_request_interval_ms.to_string(),
        ),
        ("ttl.failure_hours", config.ttl.failure_hours.to_string()),
        ("processing.max_attempts", config.processing.max_attempts.to_string()),
        (
            "analysis.max_missing_fraction",
            config.analysis.max_missing_fraction.to_string(),
        ),
        ("initiation.concurrency", config.initiation.concurrency.to_string()),
        (
            "storage.backend",
            match config.storage.backend {
                StorageBackend::InMemory => "in_memory".to_string(),
                StorageBackend::Postgres => "postgres".to_string(),
            },
        ),
    ];

    let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or_default();
    println!();
    for (key, value) in rows {
        println!("  {key:<width$}  {value}");
    }
}
