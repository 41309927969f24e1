// Core modules
pub mod api;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use api::{ExchangeError, KrakenClient, KrakenConfig, MarketData, OrderReceipt, OrderSubmitter};
pub use execution::{LoopSettings, PassReport, TradingLoop};
pub use models::*;
pub use settings::Settings;
pub use strategy::DecisionEngine;
