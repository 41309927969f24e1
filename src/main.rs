use anyhow::{Context, Result};
use clap::Parser;
use rsibot::api::KrakenClient;
use rsibot::execution::{LoopSettings, TradingLoop};
use rsibot::persistence::TradeLog;
use rsibot::settings::{credentials_from_env, Settings};
use rsibot::strategy::DecisionEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// RSI mean-reversion bot for Kraken spot pairs
#[derive(Debug, Parser)]
#[command(name = "rsibot", version, about)]
struct Cli {
    /// TOML config file (defaults to ./rsibot.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single pass over all pairs and exit
    #[arg(long)]
    once: bool,

    /// Validate orders with Kraken without placing them
    #[arg(long)]
    dry_run: bool,

    /// Trade log CSV path
    #[arg(long, value_name = "PATH")]
    trade_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.dry_run {
        settings.exchange.dry_run = true;
    }
    if let Some(path) = cli.trade_log {
        settings.trade_log.path = path;
    }

    let pairs = settings.trading_pairs()?;
    let (api_key, api_secret) = credentials_from_env()?;
    let client = Arc::new(
        KrakenClient::new(settings.kraken_config(api_key, api_secret))
            .context("Failed to create Kraken client")?,
    );

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Pairs: {}", pairs.iter().map(|p| p.pair_id.as_str()).collect::<Vec<_>>().join(", "));
    tracing::info!(
        "  RSI: period {} on {}m candles, buy < {} / sell > {}",
        settings.strategy.rsi_period,
        settings.strategy.candle_interval_minutes,
        settings.strategy.oversold,
        settings.strategy.overbought
    );
    tracing::info!("  Trade fraction: {}%", settings.strategy.trade_fraction * 100.0);
    tracing::info!("  Trade log: {}", settings.trade_log.path.display());
    if client.is_dry_run() {
        tracing::info!("  Mode: DRY RUN (orders validated, not placed)");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    let loop_settings = LoopSettings {
        rsi_period: settings.strategy.rsi_period,
        candle_interval_minutes: settings.strategy.candle_interval_minutes,
        pair_interval: settings.pair_interval(),
        cycle_interval: settings.cycle_interval(),
    };

    let mut trading_loop = TradingLoop::new(
        client.clone(),
        client,
        DecisionEngine::new(settings.decision_config()),
        TradeLog::new(settings.trade_log.path.clone()),
        pairs,
        loop_settings,
    )
    .with_shutdown(shutdown_rx);

    if cli.once {
        let report = trading_loop.run_once().await;
        match &report.skipped {
            Some(reason) => tracing::warn!("Pass skipped: {}", reason),
            None => tracing::info!(
                "✅ Pass complete: {} pairs, {} trades, {} errors",
                report.pairs.len(),
                report.trades(),
                report.failures()
            ),
        }
    } else {
        trading_loop.run().await;
    }

    tracing::info!("👋 rsibot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rsibot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
