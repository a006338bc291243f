//! # 滑动窗口限流器
//!
//! 每个客户端键（默认来源 IP）维护一个 12 槽、每槽 5 秒的环形计数，
//! 窗口总长 60 秒。比固定窗口计数平滑，不会在窗口边界放量。
//! 长时间无请求的键会被周期性清理。

use std::collections::HashMap;
use std::sync::Mutex;

use crate::dao::now_ms;

const SLOT_COUNT: usize = 12;
/// 清理扫描间隔：5 分钟
const CLEANUP_INTERVAL_MS: i64 = 5 * 60_000;

/// 一次放行判定的结果，响应头从这里取值
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// 最老的有效槽过期的墙钟秒
    pub reset_at_secs: i64,
    /// 被拒绝时建议等待的秒数
    pub retry_after_secs: i64,
}

#[derive(Debug, Clone)]
struct KeyWindow {
    /// 各槽计数
    counts: [u32; SLOT_COUNT],
    /// 各槽对应的槽起始时间（毫秒），用于判断过期
    slot_starts: [i64; SLOT_COUNT],
}

impl KeyWindow {
    fn new() -> Self {
        Self {
            counts: [0; SLOT_COUNT],
            slot_starts: [0; SLOT_COUNT],
        }
    }
}

pub struct SlidingWindowLimiter {
    max_requests: u32,
    window_ms: i64,
    slot_ms: i64,
    windows: Mutex<HashMap<String, KeyWindow>>,
    last_cleanup: Mutex<i64>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window_secs: u32) -> Self {
        let window_ms = (window_secs as i64) * 1000;
        Self {
            max_requests,
            window_ms,
            slot_ms: window_ms / SLOT_COUNT as i64,
            windows: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(0),
        }
    }

    /// 判定并登记一次请求
    pub fn allow(&self, key: &str) -> RateLimitDecision {
        self.allow_at(key, now_ms())
    }

    pub fn allow_at(&self, key: &str, now: i64) -> RateLimitDecision {
        self.cleanup_if_due(now);

        let slot_start = now - now.rem_euclid(self.slot_ms);
        let index = ((now / self.slot_ms).rem_euclid(SLOT_COUNT as i64)) as usize;
        let window_floor = now - self.window_ms;

        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(key.to_string()).or_insert_with(KeyWindow::new);

        // 当前槽若是上一圈留下的旧数据，先清零
        if window.slot_starts[index] != slot_start {
            window.slot_starts[index] = slot_start;
            window.counts[index] = 0;
        }

        let mut total: u64 = 0;
        let mut oldest_fresh_start = i64::MAX;
        for i in 0..SLOT_COUNT {
            if window.slot_starts[i] > window_floor && window.counts[i] > 0 {
                total += window.counts[i] as u64;
                oldest_fresh_start = oldest_fresh_start.min(window.slot_starts[i]);
            }
        }

        if total + 1 > self.max_requests as u64 {
            // 最老的有效槽滑出窗口时额度回补
            let reset_ms = if oldest_fresh_start == i64::MAX {
                now + self.slot_ms
            } else {
                oldest_fresh_start + self.window_ms
            };
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_at_secs: reset_ms / 1000,
                retry_after_secs: ((reset_ms - now).max(1000) + 999) / 1000,
            };
        }

        window.counts[index] += 1;
        if oldest_fresh_start == i64::MAX {
            oldest_fresh_start = slot_start;
        }

        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: (self.max_requests as u64 - total - 1) as u32,
            reset_at_secs: (oldest_fresh_start + self.window_ms) / 1000,
            retry_after_secs: 0,
        }
    }

    /// 清理整窗都过期的键，防止 map 无限增长
    fn cleanup_if_due(&self, now: i64) {
        {
            let mut last = self.last_cleanup.lock().unwrap();
            if now - *last < CLEANUP_INTERVAL_MS {
                return;
            }
            *last = now;
        }
        let window_floor = now - self.window_ms;
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|_, w| {
            w.slot_starts
                .iter()
                .zip(w.counts.iter())
                .any(|(start, count)| *start > window_floor && *count > 0)
        });
    }

    /// 当前被追踪的键数量
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}
