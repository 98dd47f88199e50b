// rust_websocket_utils/src/client/reconnect.rs

//! 重连策略。
//!
//! 无状态：给定已失败的次数，计算下一次重连前的等待时间，或给出"放弃"的结论。
//! 延迟 = `min(base * 2^attempt, cap)` 再加上 `[0, max_jitter]` 内的随机抖动。

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// 第一次重连的基础延迟。
    pub base_delay: Duration,
    /// 指数增长的上限（不含抖动）。
    pub max_delay: Duration,
    /// 随机抖动的上限。为零时延迟完全确定。
    pub max_jitter: Duration,
    /// 连续失败达到此次数后放弃。
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// 不含抖动的退避延迟。
    pub fn backoff(&self, attempt: u32) -> Duration {
        // 2^attempt 在 attempt 较大时会溢出，超过上限后直接取 cap
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// 已连续失败 `attempt` 次时，是否还应继续重连。
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// 使用调用方给定的抖动值计算延迟，抖动会被截断到 `max_jitter`。
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.backoff(attempt) + jitter.min(self.max_jitter))
    }

    /// 计算下一次重连的延迟；返回 `None` 表示应当放弃。
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = self.max_jitter.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }
}
