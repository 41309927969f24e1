//! Layered configuration
//!
//! Built-in defaults, then an optional TOML file, then `RSIBOT__*`
//! environment variables (`RSIBOT__STRATEGY__RSI_PERIOD=21`). Exchange
//! credentials are read separately from `KRAKEN_API_KEY` and
//! `KRAKEN_PRIVATE_KEY`.

use crate::api::KrakenConfig;
use crate::models::TradingPair;
use crate::strategy::DecisionConfig;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "rsibot";

pub const API_KEY_VAR: &str = "KRAKEN_API_KEY";
pub const API_SECRET_VAR: &str = "KRAKEN_PRIVATE_KEY";

/// OHLC intervals Kraken serves, in minutes
const KRAKEN_INTERVALS: &[u32] = &[1, 5, 15, 30, 60, 240, 1440, 10080, 21600];

const DEFAULT_SETTINGS: &str = r#"
[exchange]
base_url = "https://api.kraken.com"
dry_run = false
requests_per_minute = 15
timeout_secs = 30

[strategy]
rsi_period = 14
oversold = 30.0
overbought = 70.0
trade_fraction = 0.75
min_quote_balance = 1.0
candle_interval_minutes = 1

[schedule]
cycle_interval_secs = 60
pair_interval_secs = 3

[trade_log]
path = "trade_log.csv"
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub strategy: StrategySettings,
    pub schedule: ScheduleSettings,
    pub trade_log: TradeLogSettings,
    /// Evaluated in this order every pass. A config file that lists pairs
    /// replaces this list wholesale.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub dry_run: bool,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySettings {
    pub rsi_period: usize,
    pub oversold: f64,
    pub overbought: f64,
    pub trade_fraction: f64,
    pub min_quote_balance: f64,
    pub candle_interval_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    pub cycle_interval_secs: u64,
    pub pair_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeLogSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairSettings {
    pub asset: String,
    pub pair: String,
}

fn default_pairs() -> Vec<PairSettings> {
    [
        ("DOGE", "DOGECAD"),
        ("SHIB", "SHIBUSD"),
        ("BONK", "BONKUSD"),
        ("PEPE", "PEPEUSD"),
        ("FLOKI", "FLOKIUSD"),
        ("ETH", "ETHCAD"),
    ]
    .iter()
    .map(|(asset, pair)| PairSettings {
        asset: asset.to_string(),
        pair: pair.to_string(),
    })
    .collect()
}

impl Settings {
    /// Load defaults, the config file and `RSIBOT__*` overrides, then validate
    ///
    /// An explicit `path` must exist; the default `rsibot.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::default())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(File::from_str(DEFAULT_SETTINGS, FileFormat::Toml))
            .add_source(file)
            .add_source(
                env.prefix("RSIBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;

        if s.rsi_period == 0 {
            bail!("strategy.rsi_period must be at least 1");
        }
        if !(0.0..=100.0).contains(&s.oversold) || !(0.0..=100.0).contains(&s.overbought) {
            bail!("RSI thresholds must lie within [0, 100]");
        }
        if s.oversold >= s.overbought {
            bail!(
                "strategy.oversold ({}) must be below strategy.overbought ({})",
                s.oversold,
                s.overbought
            );
        }
        if !(s.trade_fraction > 0.0 && s.trade_fraction <= 1.0) {
            bail!("strategy.trade_fraction must be in (0, 1], got {}", s.trade_fraction);
        }
        if !(s.min_quote_balance >= 0.0 && s.min_quote_balance.is_finite()) {
            bail!("strategy.min_quote_balance must be a non-negative number");
        }
        if !KRAKEN_INTERVALS.contains(&s.candle_interval_minutes) {
            bail!(
                "strategy.candle_interval_minutes must be one of {:?}, got {}",
                KRAKEN_INTERVALS,
                s.candle_interval_minutes
            );
        }
        if self.exchange.requests_per_minute == 0 {
            bail!("exchange.requests_per_minute must be greater than zero");
        }

        self.trading_pairs().map(|_| ())
    }

    /// Configured pairs in evaluation order, quote currency resolved
    pub fn trading_pairs(&self) -> Result<Vec<TradingPair>> {
        if self.pairs.is_empty() {
            bail!("at least one trading pair must be configured");
        }

        let mut seen = HashSet::new();
        let mut pairs = Vec::with_capacity(self.pairs.len());
        for entry in &self.pairs {
            let pair = TradingPair::parse(&entry.asset, &entry.pair).with_context(|| {
                format!(
                    "cannot derive quote currency for pair '{}' ({})",
                    entry.pair, entry.asset
                )
            })?;
            if !seen.insert(pair.pair_id.clone()) {
                bail!("pair '{}' is configured more than once", pair.pair_id);
            }
            pairs.push(pair);
        }

        Ok(pairs)
    }

    pub fn decision_config(&self) -> DecisionConfig {
        DecisionConfig {
            oversold: self.strategy.oversold,
            overbought: self.strategy.overbought,
            trade_fraction: self.strategy.trade_fraction,
            min_quote_balance: self.strategy.min_quote_balance,
        }
    }

    pub fn kraken_config(&self, api_key: String, api_secret: String) -> KrakenConfig {
        KrakenConfig {
            base_url: self.exchange.base_url.clone(),
            dry_run: self.exchange.dry_run,
            requests_per_minute: self.exchange.requests_per_minute,
            timeout: Duration::from_secs(self.exchange.timeout_secs),
            ..KrakenConfig::new(api_key, api_secret)
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.cycle_interval_secs)
    }

    pub fn pair_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.pair_interval_secs)
    }
}

/// Read `KRAKEN_API_KEY` / `KRAKEN_PRIVATE_KEY`
pub fn credentials_from_env() -> Result<(String, String)> {
    let api_key = read_secret(API_KEY_VAR)?;
    let api_secret = read_secret(API_SECRET_VAR)?;
    Ok((api_key, api_secret))
}

fn read_secret(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("{} not found in environment", name))?;
    if value.trim().is_empty() {
        bail!("{} is set but empty", name);
    }
    Ok(value)
}
