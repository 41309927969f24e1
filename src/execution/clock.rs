use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use std::time::Duration;

/// Time source for the trading loop, swapped for a fake in tests
#[async_trait]
pub trait Clock: Send + Sync {
    /// Local wall-clock time, used to stamp trade log rows
    fn now(&self) -> DateTime<FixedOffset>;

    async fn sleep(&self, duration: Duration);
}

/// Real time: local clock and tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
