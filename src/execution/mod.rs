// Driver loop and its time source
pub mod clock;
pub mod trading_loop;

pub use clock::{Clock, SystemClock};
pub use trading_loop::{
    LoopSettings, LoopState, PairOutcome, PairReport, PassReport, TradingLoop,
};
