//! 时间源抽象，便于测试中使用固定时间。

use chrono::Utc;
use domain::Timestamp;

/// 时钟接口
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// 系统时钟
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
