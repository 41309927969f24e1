//! Exchange-facing seams of the bot
//!
//! The trading loop only sees [`MarketData`] and [`OrderSubmitter`]; the
//! Kraken REST adapter implements both, tests substitute fakes.

pub mod kraken;

use crate::models::{BalanceSnapshot, Candle, OrderSide};
use async_trait::async_trait;
use thiserror::Error;

pub use kraken::{format_volume, sign_request, KrakenClient, KrakenConfig};

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("exchange rejected request: {}", .0.join("; "))]
    Api(Vec<String>),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("volume {0} cannot be submitted")]
    InvalidVolume(f64),
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
}

/// Acknowledgement of a submitted order (not a fill)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub txids: Vec<String>,
    pub description: String,
    pub client_order_id: String,
    /// Volume exactly as submitted, after lot truncation
    pub volume: f64,
    /// The exchange only validated the order and did not place it
    pub validated_only: bool,
}

/// Source of balances and candles
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Available balance per exchange asset code
    async fn get_balances(&self) -> Result<BalanceSnapshot, ExchangeError>;

    /// Chronological OHLC candles for a pair at the given interval
    async fn get_candles(
        &self,
        pair_id: &str,
        interval_minutes: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Places market orders
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit_market_order(
        &self,
        pair_id: &str,
        side: OrderSide,
        volume: f64,
    ) -> Result<OrderReceipt, ExchangeError>;
}
