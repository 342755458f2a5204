/// Scheduler - Periodic Clearing and Bid-Update Ticks
///
/// Matchers never own threads; they ask a `Scheduler` to run their tick at a
/// fixed rate. Production code uses `TokioScheduler`, tests drive ticks by
/// hand through `ManualScheduler`.

use crate::shared::error::{PowerMatcherError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

pub type Task = Arc<dyn Fn() + Send + Sync>;

pub trait Scheduler: Send + Sync {
    /// Runs `task` now and then every `period` until cancelled
    fn schedule_at_fixed_rate(&self, period: Duration, task: Task) -> ScheduledTask;
}

/// Handle to a scheduled task; dropping it does not cancel the task
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    abort: Option<tokio::task::AbortHandle>,
}

impl ScheduledTask {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling task
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| PowerMatcherError::state(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(handle))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at_fixed_rate(&self, period: Duration, task: Task) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let join = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                task();
            }
        });
        ScheduledTask {
            cancelled,
            abort: Some(join.abort_handle()),
        }
    }
}

struct ManualEntry {
    period: Duration,
    task: Task,
    cancelled: Arc<AtomicBool>,
}

/// Runs tasks only when told to
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<ManualEntry>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every live task once, returns how many ran
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<Task> = {
            let mut entries = self.entries.lock();
            entries.retain(|e| !e.cancelled.load(Ordering::Acquire));
            entries.iter().map(|e| e.task.clone()).collect()
        };
        for task in &tasks {
            task();
        }
        tasks.len()
    }

    pub fn periods(&self) -> Vec<Duration> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .map(|e| e.period)
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at_fixed_rate(&self, period: Duration, task: Task) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().push(ManualEntry {
            period,
            task,
            cancelled: cancelled.clone(),
        });
        ScheduledTask {
            cancelled,
            abort: None,
        }
    }
}
