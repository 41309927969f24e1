use crate::models::{OrderSide, TradeLogEntry};
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;

/// Per-pair totals over a trade log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairSummary {
    pub pair: String,
    pub buys: usize,
    pub sells: usize,
    /// Base-asset volume bought
    pub bought: f64,
    /// Base-asset volume sold
    pub sold: f64,
    /// Quote spent on buys at the decision price
    pub quote_spent: f64,
    /// Quote received from sells at the decision price
    pub quote_received: f64,
    pub first_trade: Option<DateTime<FixedOffset>>,
    pub last_trade: Option<DateTime<FixedOffset>>,
}

impl PairSummary {
    pub fn trades(&self) -> usize {
        self.buys + self.sells
    }

    pub fn net_volume(&self) -> f64 {
        self.bought - self.sold
    }

    /// Average decision price of buys, if any
    pub fn avg_buy_price(&self) -> Option<f64> {
        (self.bought > 0.0).then(|| self.quote_spent / self.bought)
    }

    pub fn avg_sell_price(&self) -> Option<f64> {
        (self.sold > 0.0).then(|| self.quote_received / self.sold)
    }
}

/// Aggregate entries per pair, sorted by pair id
pub fn summarize(entries: &[TradeLogEntry]) -> Vec<PairSummary> {
    let mut by_pair: BTreeMap<&str, PairSummary> = BTreeMap::new();

    for entry in entries {
        let summary = by_pair.entry(entry.pair.as_str()).or_insert_with(|| PairSummary {
            pair: entry.pair.clone(),
            ..Default::default()
        });

        match entry.action {
            OrderSide::Buy => {
                summary.buys += 1;
                summary.bought += entry.volume;
                summary.quote_spent += entry.volume * entry.price;
            }
            OrderSide::Sell => {
                summary.sells += 1;
                summary.sold += entry.volume;
                summary.quote_received += entry.volume * entry.price;
            }
        }

        if summary.first_trade.map_or(true, |t| entry.timestamp < t) {
            summary.first_trade = Some(entry.timestamp);
        }
        if summary.last_trade.map_or(true, |t| entry.timestamp > t) {
            summary.last_trade = Some(entry.timestamp);
        }
    }

    by_pair.into_values().collect()
}
