use crate::models::{OrderSide, TradingPair};

/// Thresholds and sizing used by the RSI decision engine
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    /// RSI strictly below this is oversold (buy)
    pub oversold: f64,

    /// RSI strictly above this is overbought (sell)
    pub overbought: f64,

    /// Fraction of the relevant balance committed per trade (0, 1]
    pub trade_fraction: f64,

    /// Quote balance must exceed this before buying
    pub min_quote_balance: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            oversold: 30.0,
            overbought: 70.0,
            trade_fraction: 0.75,
            min_quote_balance: 1.0, // Ignore dust
        }
    }
}

/// Market state for one pair at decision time
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub pair: &'a TradingPair,
    pub rsi: Option<f64>,
    pub price: f64,
    pub quote_balance: f64,
    pub asset_balance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeAction {
    Buy { volume: f64 },
    Sell { volume: f64 },
    Hold,
}

impl TradeAction {
    /// Order side and volume, if this action places an order
    pub fn order(&self) -> Option<(OrderSide, f64)> {
        match self {
            TradeAction::Buy { volume } => Some((OrderSide::Buy, *volume)),
            TradeAction::Sell { volume } => Some((OrderSide::Sell, *volume)),
            TradeAction::Hold => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeDecision {
    pub action: TradeAction,
    pub reason: String,
}

impl TradeDecision {
    fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Hold,
            reason: reason.into(),
        }
    }
}

/// Turns the latest RSI reading into a buy, sell or hold decision
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Decide what to do for one pair
    ///
    /// Thresholds are strict: an RSI equal to either threshold holds.
    /// An order is only emitted with a finite, strictly positive volume.
    pub fn decide(&self, input: &DecisionInput<'_>) -> TradeDecision {
        let rsi = match input.rsi {
            Some(rsi) if rsi.is_finite() => rsi,
            _ => return TradeDecision::hold("RSI undefined (insufficient history)"),
        };

        if !input.price.is_finite() || input.price <= 0.0 {
            return TradeDecision::hold(format!("Invalid price {}", input.price));
        }

        let fraction = self.config.trade_fraction;

        if rsi < self.config.oversold {
            let quote = input.quote_balance;
            if !quote.is_finite() || quote <= self.config.min_quote_balance {
                return TradeDecision::hold(format!(
                    "Oversold (RSI {:.2}) but {} balance {} is below {}",
                    rsi, input.pair.quote, quote, self.config.min_quote_balance
                ));
            }

            let volume = quote * fraction / input.price;
            return Self::order_or_hold(TradeAction::Buy { volume }, volume, || {
                format!(
                    "Oversold (RSI {:.2} < {}), spending {:.0}% of {} {}",
                    rsi,
                    self.config.oversold,
                    fraction * 100.0,
                    quote,
                    input.pair.quote
                )
            });
        }

        if rsi > self.config.overbought {
            let held = input.asset_balance;
            if !held.is_finite() || held <= 0.0 {
                return TradeDecision::hold(format!(
                    "Overbought (RSI {:.2}) but no {} to sell",
                    rsi, input.pair.asset
                ));
            }

            let volume = held * fraction;
            return Self::order_or_hold(TradeAction::Sell { volume }, volume, || {
                format!(
                    "Overbought (RSI {:.2} > {}), selling {:.0}% of {} {}",
                    rsi,
                    self.config.overbought,
                    fraction * 100.0,
                    held,
                    input.pair.asset
                )
            });
        }

        TradeDecision::hold(format!(
            "RSI {:.2} within [{}, {}]",
            rsi, self.config.oversold, self.config.overbought
        ))
    }

    fn order_or_hold(
        action: TradeAction,
        volume: f64,
        reason: impl FnOnce() -> String,
    ) -> TradeDecision {
        if volume.is_finite() && volume > 0.0 {
            TradeDecision {
                action,
                reason: reason(),
            }
        } else {
            TradeDecision::hold(format!("Computed volume {} is not tradable", volume))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> TradingPair {
        TradingPair::parse("DOGE", "DOGEUSD").unwrap()
    }

    fn input(pair: &TradingPair, rsi: Option<f64>, price: f64, quote: f64, asset: f64) -> DecisionInput<'_> {
        DecisionInput {
            pair,
            rsi,
            price,
            quote_balance: quote,
            asset_balance: asset,
        }
    }

    #[test]
    fn test_buy_when_oversold() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&input(&pair, Some(25.0), 10.0, 100.0, 0.0));

        assert_eq!(decision.action, TradeAction::Buy { volume: 7.5 });
        assert!(decision.reason.contains("Oversold"));
    }

    #[test]
    fn test_sell_when_overbought() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&input(&pair, Some(75.0), 10.0, 0.0, 40.0));

        assert_eq!(decision.action, TradeAction::Sell { volume: 30.0 });
    }

    #[test]
    fn test_hold_between_thresholds() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&input(&pair, Some(50.0), 10.0, 1_000.0, 1_000.0));

        assert_eq!(decision.action, TradeAction::Hold);
        assert!(decision.reason.contains("within"));
    }

    #[test]
    fn test_hold_when_quote_below_dust() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&input(&pair, Some(25.0), 10.0, 0.5, 0.0));
        assert_eq!(decision.action, TradeAction::Hold);

        // Exactly at the dust threshold is still too little
        let decision = engine.decide(&input(&pair, Some(25.0), 10.0, 1.0, 0.0));
        assert_eq!(decision.action, TradeAction::Hold);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let at_low = engine.decide(&input(&pair, Some(30.0), 10.0, 100.0, 40.0));
        assert_eq!(at_low.action, TradeAction::Hold);

        let at_high = engine.decide(&input(&pair, Some(70.0), 10.0, 100.0, 40.0));
        assert_eq!(at_high.action, TradeAction::Hold);
    }

    #[test]
    fn test_undefined_rsi_holds() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&input(&pair, None, 10.0, 100.0, 40.0));
        assert_eq!(decision.action, TradeAction::Hold);
        assert!(decision.reason.contains("insufficient history"));

        let decision = engine.decide(&input(&pair, Some(f64::NAN), 10.0, 100.0, 40.0));
        assert_eq!(decision.action, TradeAction::Hold);
    }

    #[test]
    fn test_invalid_price_never_orders() {
        let pair = pair();
        let engine = DecisionEngine::default();

        for price in [0.0, -5.0, f64::INFINITY, f64::NAN] {
            let buy = engine.decide(&input(&pair, Some(10.0), price, 100.0, 40.0));
            assert_eq!(buy.action, TradeAction::Hold, "price {}", price);

            let sell = engine.decide(&input(&pair, Some(90.0), price, 100.0, 40.0));
            assert_eq!(sell.action, TradeAction::Hold, "price {}", price);
        }
    }

    #[test]
    fn test_sell_skipped_without_holdings() {
        let pair = pair();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&input(&pair, Some(85.0), 10.0, 100.0, 0.0));
        assert_eq!(decision.action, TradeAction::Hold);

        let decision = engine.decide(&input(&pair, Some(85.0), 10.0, 100.0, -3.0));
        assert_eq!(decision.action, TradeAction::Hold);
    }

    #[test]
    fn test_custom_fraction() {
        let pair = pair();
        let engine = DecisionEngine::new(DecisionConfig {
            trade_fraction: 0.5,
            ..Default::default()
        });

        let decision = engine.decide(&input(&pair, Some(80.0), 2.0, 0.0, 10.0));
        assert_eq!(decision.action, TradeAction::Sell { volume: 5.0 });
        assert_eq!(decision.action.order(), Some((OrderSide::Sell, 5.0)));
    }
}
