//! Time source used for skew checks, credential refresh and expiry.

use std::fmt::Debug;
use std::time::SystemTime;

/// A source of wall-clock time.
///
/// 墙上时钟时间来源。
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
