// Trading strategy module
pub mod decision;

pub use decision::{DecisionConfig, DecisionEngine, DecisionInput, TradeAction, TradeDecision};
