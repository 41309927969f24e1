// Durable trade record
pub mod summary;
pub mod trade_log;

pub use summary::{summarize, PairSummary};
pub use trade_log::{TradeLog, TradeLogError, TRADE_LOG_HEADER};
