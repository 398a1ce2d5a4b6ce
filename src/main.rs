// =============================================================================
// Banyan Breakdown Engine — Main Entry Point
// =============================================================================
//
// One binary, four launchable components:
//
//   data-engine       broker tick feed → tick stream + 1m candle stream
//   fetch-daily-ohlc  previous-day OHLC snapshot (run before market open)
//   algo-worker       pattern detection + execution (scale horizontally)
//   order-socket      supervised order-update reconciler
//
// Exit-code contract: 0 is an intentional restart (credential reload),
// anything else is a failure.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod cache;
mod config;
mod fyers;
mod market_data;
mod reconciler;
mod reference_loader;
mod store;
mod strategy;
mod types;
mod worker;

use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cache::Cache;
use crate::config::EngineConfig;

#[derive(Parser)]
#[command(name = "banyan-bot", version, about = "Intraday cash-market breakdown engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the market data engine: broker socket → tick + candle streams.
    DataEngine,
    /// Snapshot previous-day OHLC for the symbol universe into the cache.
    FetchDailyOhlc,
    /// Run the strategy worker: candles → setups, ticks → entries/exits.
    AlgoWorker,
    /// Run the supervised order-update reconciler.
    OrderSocket,
    /// Supervised reconciler child (spawned by `order-socket`).
    #[command(hide = true)]
    OrderSocketWorker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Environment & logging ────────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Banyan Breakdown Engine — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let cli = Cli::parse();

    match cli.command {
        Command::DataEngine => {
            let (config, pool, cache) = build_context().await?;
            market_data::feed::run_data_engine(&config, &cache, &pool).await
        }
        Command::FetchDailyOhlc => {
            let (config, pool, cache) = build_context().await?;
            reference_loader::run_reference_loader(&config, &cache, &pool).await
        }
        Command::AlgoWorker => {
            let (_config, pool, cache) = build_context().await?;
            worker::run_algo_worker(&cache, &pool).await
        }
        // The supervisor only spawns children; the child owns the I/O.
        Command::OrderSocket => reconciler::supervisor::run_supervisor().await,
        Command::OrderSocketWorker => {
            let (_config, pool, cache) = build_context().await?;
            reconciler::socket::run_order_socket_worker(&cache, &pool).await
        }
    }
}

/// Build the shared context every long-running component needs: validated
/// config, a migrated Postgres pool, and a Redis handle.
async fn build_context() -> anyhow::Result<(EngineConfig, PgPool, Cache)> {
    let config = EngineConfig::from_env()?;
    let pool = store::connect(&config.database_url).await?;
    let cache = Cache::connect(&config.redis_url).await?;

    info!(symbols = config.symbols.len(), "engine context ready");
    Ok((config, pool, cache))
}
