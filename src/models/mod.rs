use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Quote currencies recognised at the end of a pair identifier.
/// Matching picks the longest suffix, so `USDT` wins over `USD`.
const QUOTE_CURRENCIES: &[&str] = &[
    "USDT", "USDC", "USD", "CAD", "EUR", "GBP", "JPY", "CHF", "AUD", "XBT", "BTC", "ETH",
];

/// Kraken's own codes for assets whose ticker differs from the usual one
const KRAKEN_ASSET_CODES: &[(&str, &str)] = &[("DOGE", "XDG"), ("BTC", "XBT")];

/// A tracked market, e.g. asset `DOGE` traded on pair `DOGECAD` against `CAD`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradingPair {
    pub asset: String,
    pub pair_id: String,
    pub quote: String,
}

impl TradingPair {
    /// Build a pair, deriving the quote currency from the identifier suffix.
    ///
    /// Returns `None` when the identifier does not end in a known quote code
    /// or consists of nothing but the quote code.
    pub fn parse(asset: &str, pair_id: &str) -> Option<Self> {
        let pair_id = pair_id.trim().to_uppercase();
        let quote = QUOTE_CURRENCIES
            .iter()
            .filter(|code| pair_id.len() > code.len() && pair_id.ends_with(*code))
            .max_by_key(|code| code.len())?;

        Some(Self {
            asset: asset.trim().to_uppercase(),
            pair_id,
            quote: quote.to_string(),
        })
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pair_id)
    }
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub pair: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Extract the chronological closing-price series from candles
pub fn closing_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Point-in-time copy of available balances, keyed by exchange asset code
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct BalanceSnapshot {
    balances: BTreeMap<String, f64>,
}

impl BalanceSnapshot {
    pub fn new(balances: BTreeMap<String, f64>) -> Self {
        Self { balances }
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// Exact lookup, missing codes read as zero
    pub fn get(&self, code: &str) -> f64 {
        self.balances.get(code).copied().unwrap_or(0.0)
    }

    /// First present key among `candidates`, or zero
    fn first_of(&self, candidates: &[String]) -> f64 {
        candidates
            .iter()
            .find_map(|key| self.balances.get(key).copied())
            .unwrap_or(0.0)
    }

    /// Quote-currency balance for a pair (`ZCAD` before `CAD`)
    pub fn quote_balance(&self, pair: &TradingPair) -> f64 {
        self.first_of(&balance_keys(&["Z", "X"], &pair.quote))
    }

    /// Base-asset balance for a pair (`XXDG` before `XDOGE` before `DOGE`)
    pub fn asset_balance(&self, pair: &TradingPair) -> f64 {
        self.first_of(&balance_keys(&["X"], &pair.asset))
    }

    /// Human-readable serialization used in the trade log
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.balances).unwrap_or_else(|_| format!("{:?}", self.balances))
    }
}

/// Balance keys Kraken may report `code` under, most specific first
fn balance_keys(prefixes: &[&str], code: &str) -> Vec<String> {
    let kraken_code = KRAKEN_ASSET_CODES
        .iter()
        .find(|(common, _)| *common == code)
        .map(|(_, kraken)| *kraken);

    kraken_code
        .into_iter()
        .chain(std::iter::once(code))
        .flat_map(move |c| {
            prefixes
                .iter()
                .map(move |prefix| format!("{}{}", prefix, c))
                .chain(std::iter::once(c.to_string()))
        })
        .collect()
}

impl FromIterator<(String, f64)> for BalanceSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Side of a market order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side '{}'", other)),
        }
    }
}

/// One submitted trade as persisted in the trade log
#[derive(Debug, Clone, PartialEq)]
pub struct TradeLogEntry {
    pub timestamp: DateTime<FixedOffset>,
    pub pair: String,
    pub action: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub balance_snapshot: String,
}
