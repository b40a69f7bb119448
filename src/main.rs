//! Token Sniper - candidate evaluation pipeline and position exit engine
//!
//! # WARNING
//! - Most new tokens go to zero (rug pulls, abandonment).
//! - `start` runs against a simulated executor; wiring a live DEX client is
//!   up to you, and so is the money it loses.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use token_sniper::cli::commands;
use token_sniper::config::Config;

/// Token Sniper - scores new tokens and manages exits
#[derive(Parser)]
#[command(name = "snipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sniper over a candidate feed
    Start {
        /// NDJSON feed file, or "-" for stdin
        #[arg(long, default_value = "-")]
        feed: String,
    },

    /// Run admission and scoring over a feed file without trading
    Score {
        /// NDJSON feed file
        #[arg(long)]
        feed: String,
    },

    /// Show saved positions and P&L
    Status,

    /// Show current configuration
    Config,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("token_sniper=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    // Invalid configuration is fatal before anything starts
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start { feed } => commands::start(&config, &feed).await,
        Commands::Score { feed } => commands::score(&config, &feed).await,
        Commands::Status => commands::status(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
