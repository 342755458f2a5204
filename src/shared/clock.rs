/// 时间源
///
/// 出价超时、调度和监控事件都通过 `TimeSource` 取时间，
/// 测试中用 `ManualClock` 替换系统时钟。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 毫秒级时间源
pub trait TimeSource: Send + Sync {
    fn current_time_millis(&self) -> u64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    #[inline]
    fn current_time_millis(&self) -> u64 {
        get_precise_timestamp() / 1_000_000
    }
}

/// 手动时钟（测试与仿真用）
#[derive(Debug, Default)]
pub struct ManualClock {
    now_millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now_millis: AtomicU64::new(start_millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now_millis.store(millis, Ordering::Release);
    }

    pub fn advance(&self, millis: u64) {
        self.now_millis.fetch_add(millis, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn current_time_millis(&self) -> u64 {
        self.now_millis.load(Ordering::Acquire)
    }
}

/// 获取精确时间戳（纳秒，无缓存）
#[inline]
pub fn get_precise_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let t1 = clock.current_time_millis();
        thread::sleep(Duration::from_millis(5));
        let t2 = clock.current_time_millis();
        assert!(t2 > t1, "系统时钟应单调前进");
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.current_time_millis(), 1_000);
        clock.advance(250);
        assert_eq!(clock.current_time_millis(), 1_250);
        clock.set(10);
        assert_eq!(clock.current_time_millis(), 10);
    }
}
