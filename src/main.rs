//! Scrape-Conductor main entry point
//!
//! This is the command-line interface for the Scrape-Conductor scheduler.

use anyhow::Context;
use clap::Parser;
use scrape_conductor::config::{load_config_with_hash, Config};
use scrape_conductor::registry::{SourceRegistry, Tier};
use scrape_conductor::storage::{open_storage, RunStatus};
use scrape_conductor::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Scrape-Conductor: a tiered scheduler for content sources
///
/// Scrape-Conductor polls configured sources on per-tier intervals, fetches
/// them under per-domain rate limits, retries failures with exponential
/// backoff and stores the extracted articles.
#[derive(Parser, Debug)]
#[command(name = "scrape-conductor")]
#[command(version)]
#[command(about = "A tiered scheduler for content sources", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run a single scheduling pass per tier, wait for its jobs and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "trigger"])]
    once: bool,

    /// Validate config and show the source catalog without scheduling anything
    #[arg(long, conflicts_with_all = ["stats", "trigger"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "trigger")]
    stats: bool,

    /// Enqueue an on-demand job for SOURCE and exit
    #[arg(long, value_name = "SOURCE")]
    trigger: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(source) = &cli.trigger {
        handle_trigger(config, &config_hash, source)
    } else if cli.once {
        handle_once(config, &config_hash).await
    } else {
        handle_run(config, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("scrape_conductor=info,warn"),
            1 => EnvFilter::new("scrape_conductor=debug,info"),
            2 => EnvFilter::new("scrape_conductor=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and lists the sources per tier
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let registry = SourceRegistry::from_config(config)?;

    println!("=== Scrape-Conductor Dry Run ===\n");

    println!("Orchestrator:");
    println!("  Tick: {}s", config.orchestrator.tick_seconds);
    println!("  Fetch timeout: {}s", config.orchestrator.fetch_timeout_seconds);
    println!(
        "  Rate limit: {} requests / {}s per domain",
        config.rate_limit.max_requests, config.rate_limit.window_seconds
    );
    println!(
        "  Backoff: {}s x {}^n, capped at {}s",
        config.retry.initial_delay_seconds,
        config.retry.backoff_base,
        config.retry.max_delay_seconds
    );

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    for tier in Tier::all() {
        let settings = registry.tier_settings(tier);
        let mut sources: Vec<_> = registry.in_tier(tier).collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));

        println!(
            "\nTier {} ({} sources, {} workers, {} retries):",
            tier,
            sources.len(),
            settings.max_concurrency,
            settings.max_retries
        );
        for source in sources {
            let state = if source.enabled { "" } else { " [disabled]" };
            println!(
                "  - {} ({}, every {}m){}",
                source.name,
                source.mode,
                source.interval.as_secs() / 60,
                state
            );
            println!("    * {}", source.url);
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would schedule {} sources", registry.len());

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use scrape_conductor::output::{load_statistics, print_statistics};

    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage, &storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --trigger mode: enqueues one on-demand job
fn handle_trigger(config: Config, config_hash: &str, source: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::open(config, config_hash)?;
    let outcome = orchestrator.trigger(source)?;
    orchestrator.finish(RunStatus::Completed)?;

    if outcome.is_new() {
        println!("✓ Enqueued job {} for {}", outcome.job_id(), source);
    } else {
        println!(
            "✓ {} already has job {} outstanding",
            source,
            outcome.job_id()
        );
    }

    Ok(())
}

/// Handles the --once mode: one pass per tier
async fn handle_once(config: Config, config_hash: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::open(config, config_hash)?;
    let report = orchestrator.run_once().await;
    orchestrator.finish(RunStatus::Completed)?;

    tracing::info!(
        enqueued = report.enqueued,
        coalesced = report.coalesced,
        rate_limited = report.rate_limited,
        finished = report.finished.len(),
        "Single pass complete"
    );

    Ok(())
}

/// Handles the main scheduling loop until Ctrl-C
async fn handle_run(config: Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!("Sources configured: {}", config.sources.len());

    let orchestrator = Arc::new(Orchestrator::open(config, config_hash)?);
    let mut runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    tokio::select! {
        result = &mut runner => {
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("Interrupt received, shutting down");
        }
    }

    orchestrator.shutdown();
    runner.await??;
    tracing::info!("Shutdown complete");

    Ok(())
}
