// rust_websocket_utils/src/client/scheduler.rs

//! 定时器能力。
//!
//! 会话中的所有定时行为（重连延迟、心跳、pong 超时、握手超时）都通过 `Scheduler` 安排，
//! 而不是直接调用 `tokio::time::sleep`。生产环境使用 `TokioScheduler`，
//! 测试使用 `testing::ManualScheduler` 以虚拟时间确定性地推进。

use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// 已安排定时器的标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// 到期时执行的一次性任务。
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// 安排/取消一次性定时任务的能力。
///
/// 约定：`cancel` 返回后，对应任务保证不会再被执行（即便它已经到期但尚未运行）。
pub trait Scheduler: Send + Sync + 'static {
    /// 当前时刻。延迟测量使用同一个时钟。
    fn now(&self) -> Instant;

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;

    fn cancel(&self, id: TimerId);
}

/// 获取互斥锁；锁被毒化时继续使用内部数据（定时器表本身不会处于不一致状态）。
pub fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 基于 tokio 运行时的调度器。每个定时器是一个先 `sleep` 后执行的异步任务。
///
/// `schedule` 必须在 tokio 运行时上下文中调用。
#[derive(Debug, Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尚未到期也未取消的定时器数量。
    pub fn pending(&self) -> usize {
        lock_or_recover(&self.timers).len()
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        // 插入完成前持有锁，保证任务到期后一定能在表中找到自己
        let mut guard = lock_or_recover(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // 只有仍在表中（未被取消）的定时器才执行
            let still_armed = lock_or_recover(&timers).remove(&id).is_some();
            if still_armed {
                task();
            } else {
                debug!("[调度器] 定时器 #{} 到期时已被取消，跳过执行。", id);
            }
        });
        guard.insert(id, handle.abort_handle());
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = lock_or_recover(&self.timers).remove(&id.0) {
            handle.abort();
        }
    }
}
