use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stickyscrape::config::Config;
use stickyscrape::error::StickyErrorTrait;

mod commands;

use commands::scrape::TargetKind;

#[derive(Parser)]
#[command(
    name = "stickyscrape",
    version,
    about = "Sticky-session scraper over a self-refilling proxy pool",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); STICKY_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the config's logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one target across several sticky sessions
    Scrape {
        /// What to scrape
        #[arg(value_enum)]
        kind: TargetKind,

        /// Query, hashtag, username, or tweet id/URL
        target: String,

        /// Number of sessions (default: one per loaded proxy)
        #[arg(short, long)]
        sessions: Option<usize>,

        /// Maximum items kept after merging
        #[arg(short, long, default_value = "500")]
        limit: usize,

        /// Sort search results by "top" instead of "latest"
        #[arg(long, default_value = "false")]
        top: bool,

        /// Run without the cookie file
        #[arg(long, default_value = "false")]
        anonymous: bool,

        /// Print Prometheus metrics after the run
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Run every target in a TOML job file
    Batch {
        /// Job file path
        jobs: PathBuf,

        /// Run without the cookie file
        #[arg(long, default_value = "false")]
        anonymous: bool,

        /// Print Prometheus metrics after the run
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Build and maintain the proxy list
    Proxies {
        #[command(subcommand)]
        action: ProxyAction,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ProxyAction {
    /// Harvest public lists and keep the working proxies
    Harvest {
        /// Write the raw candidates without probing them
        #[arg(long, default_value = "false")]
        skip_validation: bool,

        /// Output file (default: pool.proxies_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-probe an existing list and drop dead entries
    Validate {
        /// Input file (default: pool.proxies_file)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Initialize tracing/logging
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    if let Err(e) = stickyscrape::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    let outcome = run(cli.command, config).await;
    if let Err(e) = &outcome {
        if let Some(err) = e.chain().find_map(|c| c.downcast_ref::<stickyscrape::Error>()) {
            tracing::error!(
                category = %err.category(),
                recoverable = err.is_recoverable(),
                error = %err,
                "Command failed"
            );
        }
    }
    outcome
}

async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Scrape {
            kind,
            target,
            sessions,
            limit,
            top,
            anonymous,
            metrics,
        } => {
            let target = kind.into_target(target, top);
            tracing::info!(
                target = %target.label(),
                sessions = ?sessions,
                limit = %limit,
                anonymous = %anonymous,
                "Starting scrape command"
            );
            commands::scrape(config, target, sessions, limit, anonymous).await?;
            if metrics {
                commands::print_metrics();
            }
        }

        Commands::Batch {
            jobs,
            anonymous,
            metrics,
        } => {
            tracing::info!(jobs = %jobs.display(), "Starting batch command");
            commands::batch(config, &jobs, anonymous).await?;
            if metrics {
                commands::print_metrics();
            }
        }

        Commands::Proxies { action } => match action {
            ProxyAction::Harvest {
                skip_validation,
                output,
            } => {
                commands::harvest(config, skip_validation, output.as_deref()).await?;
            }
            ProxyAction::Validate { input, output } => {
                commands::validate(config, input.as_deref(), output.as_deref()).await?;
            }
        },

        Commands::Config => {
            commands::show_config(&config)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("stickyscrape=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("stickyscrape={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
