//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::filter::admission::AdmissionFilter;
use crate::filter::scoring::Scorer;
use crate::filter::types::Candidate;
use crate::pipeline::{Collaborators, Sniper};
use crate::position::manager::load_snapshot;
use crate::position::price_feed::PriceBook;
use crate::stream::feed::{CandidateFeed, JsonLinesFeed};
use crate::trading::simulation::{SimulatedExecutor, SimulationConfig};

/// Start the sniper over an NDJSON feed (`-` for stdin) with simulated
/// execution
pub async fn start(config: &Config, feed: &str) -> Result<()> {
    info!("Starting token sniper...");
    info!(
        "Mode: {} | auto-buy: {} | workers: {}",
        config.decision.mode, config.decision.auto_buy_enabled, config.dispatch.workers
    );
    warn!("Execution is SIMULATED: fills come from feed prices, no transactions are sent");

    let prices = PriceBook::new();
    let executor = Arc::new(SimulatedExecutor::new(
        Arc::new(prices.clone()),
        SimulationConfig::default(),
    ));
    let sniper = Sniper::new(
        config,
        Collaborators {
            executor,
            prices: Arc::new(prices.clone()),
            predictor: None,
            learning: None,
        },
    )
    .await
    .context("Failed to initialise sniper")?;

    // Alerts need a human; print them for manual follow-up
    let alerts = sniper.pipeline().alerts();
    tokio::spawn(async move {
        while let Ok(alert) = alerts.recv().await {
            println!(
                "ALERT {} score={:.1} size={:.3} SOL mode={}",
                alert.intent.address, alert.score, alert.intent.size_sol, alert.intent.mode
            );
        }
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    shutdown.cancel();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
            }
        });
    }

    if feed == "-" {
        let reader = BufReader::new(tokio::io::stdin());
        run_feed(sniper, JsonLinesFeed::new(reader, prices), shutdown).await
    } else {
        let file = tokio::fs::File::open(feed)
            .await
            .with_context(|| format!("Cannot open feed {}", feed))?;
        let reader = BufReader::new(file);
        run_feed(sniper, JsonLinesFeed::new(reader, prices), shutdown).await
    }
}

async fn run_feed<F: CandidateFeed>(
    sniper: Sniper,
    feed: F,
    shutdown: CancellationToken,
) -> Result<()> {
    sniper.run(feed, shutdown).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Run admission and scoring over a feed file without trading
pub async fn score(config: &Config, feed: &str) -> Result<()> {
    let file = tokio::fs::File::open(feed)
        .await
        .with_context(|| format!("Cannot open feed {}", feed))?;
    let rows = score_feed(config, BufReader::new(file)).await?;

    println!("\n=== CANDIDATE SCORES ===\n");
    for row in &rows {
        println!("{}", row);
    }
    let passed = rows.iter().filter(|r| r.starts_with("PASS")).count();
    println!("\n{} candidates, {} passed admission", rows.len(), passed);
    Ok(())
}

async fn score_feed<R: AsyncBufRead + Unpin + Send>(
    config: &Config,
    reader: R,
) -> Result<Vec<String>> {
    let filter = AdmissionFilter::new(config.filters.clone());
    let scorer = Scorer::new(config.scoring.clone());
    let mut feed = JsonLinesFeed::new(reader, PriceBook::new());
    let mut rows = Vec::new();

    while let Some(update) = feed.next().await? {
        let now = Utc::now();
        let candidate = Candidate::from_update(update, now, now);
        let address = candidate.address.clone();
        let row = match filter.admit(candidate) {
            Ok(admitted) => {
                let result = scorer.score(&admitted);
                format!(
                    "PASS {:<44} {:>5.1}  {}",
                    address,
                    result.score,
                    result.reasons.join(", ")
                )
            }
            Err(reason) => format!("FAIL {:<44} {}", address, reason),
        };
        rows.push(row);
    }
    Ok(rows)
}

/// Show positions from the last saved snapshot
pub async fn status(config: &Config) -> Result<()> {
    let Some(path) = config.persistence.positions_path.as_deref() else {
        println!("Position persistence is disabled (persistence.positions_path not set).");
        return Ok(());
    };

    println!("\n=== SNIPER STATUS ===\n");
    if !Path::new(path).exists() {
        println!("No snapshot at {}", path);
        return Ok(());
    }

    let positions = load_snapshot(Path::new(path))
        .await
        .context("Failed to load positions")?;
    let entry_total: f64 = positions.iter().map(|p| p.entry_sol).sum();
    let realized_total: f64 = positions.iter().map(|p| p.realized_pnl_sol()).sum();

    println!("Positions: {}", positions.len());
    println!("Total Entry: {:.4} SOL", entry_total);
    println!("Realized P&L: {:.4} SOL", realized_total);

    println!("\n=== OPEN POSITIONS ===\n");
    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    let now = Utc::now();
    for p in &positions {
        println!(
            "{}  {}  entry {:.4} SOL @ {:.8}  remaining {:.0}%  last {:+.1}%  held {}s{}",
            p.address,
            p.status,
            p.entry_sol,
            p.entry_price,
            p.filled_fraction * 100.0,
            p.unrealized_pnl_pct(),
            p.hold_secs(now),
            match &p.pending_exit {
                Some(order) => format!("  (exit pending: {})", order.trigger),
                None => String::new(),
            }
        );
    }

    Ok(())
}

/// Show current configuration (paths masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
