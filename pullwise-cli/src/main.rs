//! Pullwise CLI - Command line interface for Pullwise
//!
//! Consumes pull request events and posts AI-generated reviews.

mod commands;
mod logging;
mod metrics_server;
mod providers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pullwise_core::Config;

use commands::{ConsumeArgs, ReviewArgs};

/// Pullwise: automated pull request reviews
#[derive(Parser, Debug)]
#[command(name = "pullwise")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ~/.config/pullwise/config.toml)
    #[arg(short, long, global = true, env = "PULLWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9184)
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run the worker pool over a JSON-lines stream of review events
    #[command(visible_alias = "c")]
    Consume(ConsumeArgs),

    /// Review a single pull request
    #[command(visible_alias = "r")]
    Review(ReviewArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let workers = match &cli.command {
        Some(Commands::Consume(args)) => args.workers,
        _ => None,
    };

    // Load configuration with overrides
    let config =
        Config::load_with_overrides(cli.config.as_deref(), workers, cli.metrics_addr.clone())?;

    if cli.verbose {
        tracing::debug!(
            workers = config.worker.count,
            event_timeout = ?config.worker.event_timeout,
            llm_model = %config.llm.model,
            embedding_model = %config.embedding.model,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("pullwise {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Consume(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Review(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Config) => {
            println!("Pullwise Configuration");
            println!("======================");
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            println!();
            let path = cli.config.clone().or_else(Config::default_config_path);
            if let Some(path) = path {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("Pullwise - automated pull request reviews");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
