use super::clock::{Clock, SystemClock};
use crate::api::{MarketData, OrderSubmitter};
use crate::indicators::calculate_rsi;
use crate::models::{closing_prices, BalanceSnapshot, OrderSide, TradeLogEntry, TradingPair};
use crate::persistence::TradeLog;
use crate::strategy::{DecisionEngine, DecisionInput};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Terminal
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub rsi_period: usize,
    pub candle_interval_minutes: u32,
    /// Pause between consecutive pairs within a pass
    pub pair_interval: Duration,
    /// Sleep after each pass
    pub cycle_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            candle_interval_minutes: 1,
            pair_interval: Duration::from_secs(3),
            cycle_interval: Duration::from_secs(60),
        }
    }
}

/// What happened to one pair during a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Held {
        rsi: Option<f64>,
        reason: String,
    },
    /// Order accepted by the exchange; `logged` is false if the trade log
    /// write failed afterwards
    Traded {
        side: OrderSide,
        price: f64,
        volume: f64,
        logged: bool,
    },
    /// Order validated by the exchange but not placed
    Validated {
        side: OrderSide,
        price: f64,
        volume: f64,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairReport {
    pub pair: String,
    pub outcome: PairOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub pairs: Vec<PairReport>,
    /// Why the whole pass was skipped, if it was
    pub skipped: Option<String>,
    /// An interrupt arrived before every pair was evaluated
    pub interrupted: bool,
}

impl PassReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn trades(&self) -> usize {
        self.pairs
            .iter()
            .filter(|r| matches!(r.outcome, PairOutcome::Traded { .. }))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.pairs
            .iter()
            .filter(|r| matches!(r.outcome, PairOutcome::Failed { .. }))
            .count()
    }
}

/// Polls balances and candles, decides per pair and submits orders
///
/// One pass fetches balances once and then walks the pairs in configured
/// order. The snapshot is not refreshed mid-pass, so an order on an early
/// pair does not change the balances seen by later pairs in the same pass.
/// Errors are contained to the pair (or, for balances, the pass) where
/// they happen.
pub struct TradingLoop {
    market: Arc<dyn MarketData>,
    orders: Arc<dyn OrderSubmitter>,
    clock: Arc<dyn Clock>,
    engine: DecisionEngine,
    trade_log: TradeLog,
    pairs: Vec<TradingPair>,
    settings: LoopSettings,
    state: LoopState,
    shutdown: Option<watch::Receiver<bool>>,
}

impl TradingLoop {
    pub fn new(
        market: Arc<dyn MarketData>,
        orders: Arc<dyn OrderSubmitter>,
        engine: DecisionEngine,
        trade_log: TradeLog,
        pairs: Vec<TradingPair>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            market,
            orders,
            clock: Arc::new(SystemClock),
            engine,
            trade_log,
            pairs,
            settings,
            state: LoopState::Running,
            shutdown: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop between pairs or during a sleep once `true` is sent
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    /// Run passes until interrupted
    pub async fn run(&mut self) {
        tracing::info!(
            "🚀 Starting RSI-based trading bot ({} pairs, RSI {} on {}m candles)",
            self.pairs.len(),
            self.settings.rsi_period,
            self.settings.candle_interval_minutes
        );

        while self.state == LoopState::Running {
            let report = self.run_pass().await;

            if report.interrupted || self.stop_requested() {
                self.state = LoopState::Stopped;
                break;
            }

            tracing::info!(
                "✅ Cycle complete ({} trades, {} errors). Sleeping for {} seconds...",
                report.trades(),
                report.failures(),
                self.settings.cycle_interval.as_secs()
            );

            if !self.pause(self.settings.cycle_interval).await {
                self.state = LoopState::Stopped;
            }
        }

        tracing::info!("🛑 Bot stopped manually.");
    }

    /// Run a single pass and stop
    pub async fn run_once(&mut self) -> PassReport {
        let report = self.run_pass().await;
        self.state = LoopState::Stopped;
        report
    }

    /// One full evaluation of every configured pair
    pub async fn run_pass(&mut self) -> PassReport {
        let balances = match self.market.get_balances().await {
            Ok(balances) if balances.is_empty() => {
                tracing::warn!("⚠️ No balances found. Skipping cycle.");
                return PassReport::skipped("no balances returned");
            }
            Ok(balances) => balances,
            Err(e) => {
                tracing::error!("❌ Error getting account balance: {}", e);
                return PassReport::skipped(format!("balance fetch failed: {}", e));
            }
        };

        tracing::debug!("Balance snapshot: {}", balances.to_json());

        let pairs = self.pairs.clone();
        let mut report = PassReport::default();

        for (index, pair) in pairs.iter().enumerate() {
            let paused = index == 0 || self.pause(self.settings.pair_interval).await;
            if !paused || self.stop_requested() {
                tracing::info!("Interrupted before {}", pair);
                report.interrupted = true;
                break;
            }

            let outcome = self.process_pair(pair, &balances).await;
            report.pairs.push(PairReport {
                pair: pair.pair_id.clone(),
                outcome,
            });
        }

        report
    }

    async fn process_pair(&self, pair: &TradingPair, balances: &BalanceSnapshot) -> PairOutcome {
        tracing::info!("🔍 Checking {}...", pair);

        let candles = match self
            .market
            .get_candles(&pair.pair_id, self.settings.candle_interval_minutes)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::error!("❌ Error processing {}: {}", pair, e);
                return PairOutcome::Failed {
                    error: format!("candle fetch failed: {}", e),
                };
            }
        };

        let prices = closing_prices(&candles);
        let price = match prices.last() {
            Some(&price) => price,
            None => {
                tracing::error!("❌ Error processing {}: no candles returned", pair);
                return PairOutcome::Failed {
                    error: "no candles returned".to_string(),
                };
            }
        };

        let rsi = calculate_rsi(&prices, self.settings.rsi_period);
        match rsi {
            Some(value) => tracing::info!(
                pair = %pair,
                rsi = value,
                price,
                "📈 RSI for {}: {:.2} | Price: {:.6}",
                pair,
                value,
                price
            ),
            None => tracing::warn!(
                "📈 RSI for {} undefined ({} candles, period {}) | Price: {:.6}",
                pair,
                candles.len(),
                self.settings.rsi_period,
                price
            ),
        }

        let decision = self.engine.decide(&DecisionInput {
            pair,
            rsi,
            price,
            quote_balance: balances.quote_balance(pair),
            asset_balance: balances.asset_balance(pair),
        });

        let Some((side, volume)) = decision.action.order() else {
            tracing::debug!("  Hold {}: {}", pair, decision.reason);
            return PairOutcome::Held {
                rsi,
                reason: decision.reason,
            };
        };

        tracing::info!("  Decision: {} {} - {}", side, pair, decision.reason);

        let receipt = match self
            .orders
            .submit_market_order(&pair.pair_id, side, volume)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!("❌ {} order for {} failed: {}", side, pair, e);
                return PairOutcome::Failed {
                    error: format!("{} order failed: {}", side, e),
                };
            }
        };

        // Log what the exchange received, not the untruncated decision
        let volume = receipt.volume;

        if receipt.validated_only {
            tracing::info!(
                "🧪 Dry run: would {} {} {} @ {:.4} ({})",
                side,
                volume,
                pair,
                price,
                receipt.description
            );
            return PairOutcome::Validated {
                side,
                price,
                volume,
            };
        }

        tracing::debug!(
            "  Order accepted: {} txids={:?} cl_ord_id={}",
            receipt.description,
            receipt.txids,
            receipt.client_order_id
        );

        let entry = TradeLogEntry {
            timestamp: self.clock.now(),
            pair: pair.pair_id.clone(),
            action: side,
            price,
            volume,
            balance_snapshot: balances.to_json(),
        };

        let logged = match self.trade_log.append(&entry) {
            Ok(()) => {
                tracing::info!(
                    "📝 {} {}: {} @ {:.4}",
                    side.as_str().to_uppercase(),
                    pair,
                    volume,
                    price
                );
                true
            }
            Err(e) => {
                // The order is already on the exchange; keep every field in the logs
                tracing::error!(
                    timestamp = %entry.timestamp.to_rfc3339(),
                    pair = %entry.pair,
                    action = %entry.action,
                    price = entry.price,
                    volume = entry.volume,
                    balance_snapshot = %entry.balance_snapshot,
                    "❌ Trade submitted but NOT recorded in {}: {}",
                    self.trade_log.path().display(),
                    e
                );
                false
            }
        };

        PairOutcome::Traded {
            side,
            price,
            volume,
            logged,
        }
    }

    fn stop_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|shutdown| *shutdown.borrow())
            .unwrap_or(false)
    }

    /// Sleep for `duration`, returning false if interrupted
    async fn pause(&mut self, duration: Duration) -> bool {
        if self.stop_requested() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let clock = Arc::clone(&self.clock);
        let mut sleep = clock.sleep(duration);

        let Some(shutdown) = self.shutdown.as_mut() else {
            sleep.await;
            return true;
        };

        let mut sender_gone = false;
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow_and_update() => return false,
                    Ok(()) => {}
                    Err(_) => {
                        // Nothing can signal an interrupt anymore; finish the same sleep
                        sender_gone = true;
                        (&mut sleep).await;
                        break;
                    }
                },
            }
        }

        if sender_gone {
            self.shutdown = None;
        }

        !self.stop_requested()
    }
}
