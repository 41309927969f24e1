use anyhow::{Context, Result};
use clap::Parser;
use rsibot::persistence::{summarize, TradeLog};
use rsibot::settings::Settings;
use std::path::PathBuf;

/// Summarize the trade log per pair
#[derive(Debug, Parser)]
#[command(name = "trade_report", about)]
struct Args {
    /// Trade log CSV (defaults to the configured trade_log.path)
    #[arg(long, value_name = "PATH")]
    trade_log: Option<PathBuf>,

    /// Config file used to locate the trade log
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also print every recorded trade
    #[arg(long)]
    detailed: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("rsibot=warn")
        .init();

    let args = Args::parse();
    let path = match args.trade_log {
        Some(path) => path,
        None => {
            Settings::load(args.config.as_deref())
                .context("Failed to load configuration")?
                .trade_log
                .path
        }
    };

    println!("\n═══════════════════════════════════════════════════════");
    println!("                  TRADE LOG REPORT");
    println!("═══════════════════════════════════════════════════════\n");

    if !path.exists() {
        eprintln!("No trade log at {}", path.display());
        return Ok(());
    }

    let entries = TradeLog::new(&path)
        .read_all()
        .with_context(|| format!("Failed to read {}", path.display()))?;

    println!("✓ Loaded {} trades from {}", entries.len(), path.display());
    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        println!("Period: {} to {}\n", first.timestamp, last.timestamp);
    }

    if entries.is_empty() {
        return Ok(());
    }

    let summaries = summarize(&entries);

    println!(
        "{:<12} {:>5} {:>5} {:>18} {:>18} {:>18} {:>14} {:>14}",
        "Pair", "Buys", "Sells", "Bought", "Sold", "Net", "Avg Buy", "Avg Sell"
    );
    println!("{}", "─".repeat(112));

    for s in &summaries {
        println!(
            "{:<12} {:>5} {:>5} {:>18.8} {:>18.8} {:>+18.8} {:>14} {:>14}",
            s.pair,
            s.buys,
            s.sells,
            s.bought,
            s.sold,
            s.net_volume(),
            format_price(s.avg_buy_price()),
            format_price(s.avg_sell_price()),
        );
    }

    let buys: usize = summaries.iter().map(|s| s.buys).sum();
    let sells: usize = summaries.iter().map(|s| s.sells).sum();
    println!("\n─────────────────────────────────────────────────────────");
    println!("Total Trades:        {}", buys + sells);
    println!("Buys:                {}", buys);
    println!("Sells:               {}", sells);
    println!("Pairs Traded:        {}", summaries.len());

    if args.detailed {
        println!("\n═══════════════════════════════════════════════════════");
        println!("                DETAILED TRADE LIST");
        println!("═══════════════════════════════════════════════════════\n");
        println!("{:<5} {:<27} {:<12} {:<5} {:>16} {:>20}", "#", "Time", "Pair", "Side", "Price", "Volume");
        println!("{}", "─".repeat(90));
        for (i, entry) in entries.iter().enumerate() {
            println!(
                "{:<5} {:<27} {:<12} {:<5} {:>16} {:>20}",
                i + 1,
                entry.timestamp.to_rfc3339(),
                entry.pair,
                entry.action,
                entry.price,
                entry.volume
            );
        }
    }

    println!();
    Ok(())
}

fn format_price(price: Option<f64>) -> String {
    price.map_or_else(|| "-".to_string(), |p| format!("{:.8}", p))
}
