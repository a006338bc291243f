//! # 供应商熔断器
//!
//! 三态熔断，按供应商隔离故障：
//! - CLOSED: 正常放行
//! - OPEN: 处罚期内，调度必须跳过
//! - HALF_OPEN: 处罚期已过，等待探测确认恢复
//!
//! 处罚时长从 30 分钟起，连续失败逐次翻倍，封顶 4 小时。
//! 连续失败达到阈值时向外示意触发一次模型重同步。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};

use serde::Serialize;

use crate::dao::now_ms;

const SHARD_COUNT: usize = 8;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub initial_penalty_ms: i64,
    pub max_penalty_ms: i64,
    /// 连续失败达到该值时请求一次模型重同步
    pub resync_threshold: u32,
    /// 两次重同步请求之间的最短间隔
    pub resync_cooldown_ms: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            initial_penalty_ms: 30 * 60_000,
            max_penalty_ms: 4 * 60 * 60_000,
            resync_threshold: 3,
            resync_cooldown_ms: 10 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BreakerEntry {
    consecutive_failures: u32,
    /// 0 表示从未受罚
    current_penalty_ms: i64,
    /// 0 表示当前没有处罚期
    penalty_until: i64,
    probe_in_flight: bool,
    last_resync_at: i64,
}

impl BreakerEntry {
    fn state_at(&self, now: i64) -> BreakerState {
        if self.penalty_until == 0 {
            BreakerState::Closed
        } else if now < self.penalty_until {
            BreakerState::Open
        } else {
            BreakerState::HalfOpen
        }
    }
}

/// 一次失败登记的结果
#[derive(Debug, Clone)]
pub struct FailureVerdict {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub penalty_ms: i64,
    pub penalty_until: i64,
    /// 达到阈值且冷却期已过，调用方应安排一次模型重同步
    pub should_resync: bool,
}

/// 管理接口暴露的状态视图
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub provider_id: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub current_penalty_ms: i64,
    pub penalty_until: i64,
    pub retry_in_ms: i64,
}

pub struct CircuitBreaker {
    config: RwLock<BreakerConfig>,
    shards: Vec<Mutex<HashMap<String, BreakerEntry>>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// 运行时更新处罚参数（管理接口改 settings 后调用）
    pub fn set_config(&self, config: BreakerConfig) {
        *self.config.write().unwrap() = config;
    }

    pub fn config(&self) -> BreakerConfig {
        self.config.read().unwrap().clone()
    }

    fn shard(&self, provider_id: &str) -> &Mutex<HashMap<String, BreakerEntry>> {
        let mut hasher = DefaultHasher::new();
        provider_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub fn state(&self, provider_id: &str) -> BreakerState {
        self.state_at(provider_id, now_ms())
    }

    pub fn state_at(&self, provider_id: &str, now: i64) -> BreakerState {
        let shard = self.shard(provider_id).lock().unwrap();
        shard
            .get(provider_id)
            .map(|entry| entry.state_at(now))
            .unwrap_or(BreakerState::Closed)
    }

    /// 登记一次计罚失败（上游 5xx/超时/配额类）
    pub fn on_failure(&self, provider_id: &str) -> FailureVerdict {
        self.on_failure_at(provider_id, now_ms())
    }

    pub fn on_failure_at(&self, provider_id: &str, now: i64) -> FailureVerdict {
        let config = self.config();
        let mut shard = self.shard(provider_id).lock().unwrap();
        let entry = shard.entry(provider_id.to_string()).or_default();

        entry.consecutive_failures += 1;
        entry.current_penalty_ms = if entry.current_penalty_ms <= 0 {
            config.initial_penalty_ms
        } else if entry.consecutive_failures == 1 {
            // 成功后被折半过的处罚值保留记忆，首个失败不翻倍
            entry.current_penalty_ms.max(config.initial_penalty_ms)
        } else {
            (entry.current_penalty_ms * 2).min(config.max_penalty_ms)
        };
        entry.penalty_until = now + entry.current_penalty_ms;
        entry.probe_in_flight = false;

        let should_resync = entry.consecutive_failures >= config.resync_threshold
            && (entry.last_resync_at == 0
                || now - entry.last_resync_at > config.resync_cooldown_ms);
        if should_resync {
            entry.last_resync_at = now;
        }

        FailureVerdict {
            state: entry.state_at(now),
            consecutive_failures: entry.consecutive_failures,
            penalty_ms: entry.current_penalty_ms,
            penalty_until: entry.penalty_until,
            should_resync,
        }
    }

    /// 登记一次成功
    pub fn on_success(&self, provider_id: &str) {
        self.on_success_at(provider_id, now_ms());
    }

    pub fn on_success_at(&self, provider_id: &str, now: i64) {
        let config = self.config();
        let mut shard = self.shard(provider_id).lock().unwrap();
        let Some(entry) = shard.get_mut(provider_id) else { return };

        match entry.state_at(now) {
            BreakerState::HalfOpen => {
                // 恢复确认，全部复位
                entry.consecutive_failures = 0;
                entry.current_penalty_ms = config.initial_penalty_ms;
                entry.penalty_until = 0;
                entry.probe_in_flight = false;
            }
            BreakerState::Closed => {
                entry.consecutive_failures = 0;
                if entry.current_penalty_ms > config.initial_penalty_ms {
                    entry.current_penalty_ms =
                        (entry.current_penalty_ms / 2).max(config.initial_penalty_ms);
                }
            }
            BreakerState::Open => {
                // 处罚期内不应有流量，留给探测处理
            }
        }
    }

    /// 申请探测权，同一供应商同时只允许一个探测在途
    pub fn try_begin_probe(&self, provider_id: &str) -> bool {
        self.try_begin_probe_at(provider_id, now_ms())
    }

    pub fn try_begin_probe_at(&self, provider_id: &str, now: i64) -> bool {
        let mut shard = self.shard(provider_id).lock().unwrap();
        let Some(entry) = shard.get_mut(provider_id) else { return false };
        if entry.state_at(now) != BreakerState::HalfOpen || entry.probe_in_flight {
            return false;
        }
        entry.probe_in_flight = true;
        true
    }

    /// 探测完成；成功复位，失败按失败转移继续翻倍
    pub fn finish_probe(&self, provider_id: &str, ok: bool) -> Option<FailureVerdict> {
        self.finish_probe_at(provider_id, ok, now_ms())
    }

    pub fn finish_probe_at(&self, provider_id: &str, ok: bool, now: i64) -> Option<FailureVerdict> {
        {
            let mut shard = self.shard(provider_id).lock().unwrap();
            if let Some(entry) = shard.get_mut(provider_id) {
                entry.probe_in_flight = false;
            }
        }
        if ok {
            self.on_success_at(provider_id, now);
            None
        } else {
            Some(self.on_failure_at(provider_id, now))
        }
    }

    /// 管理接口手动复位
    pub fn reset(&self, provider_id: &str) {
        let mut shard = self.shard(provider_id).lock().unwrap();
        shard.remove(provider_id);
    }

    /// 供应商删除时回收状态
    pub fn remove(&self, provider_id: &str) {
        self.reset(provider_id);
    }

    /// 导出全部状态
    pub fn all_status(&self) -> Vec<BreakerStatus> {
        self.all_status_at(now_ms())
    }

    pub fn all_status_at(&self, now: i64) -> Vec<BreakerStatus> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap();
            for (id, entry) in shard.iter() {
                out.push(BreakerStatus {
                    provider_id: id.clone(),
                    state: entry.state_at(now),
                    consecutive_failures: entry.consecutive_failures,
                    current_penalty_ms: entry.current_penalty_ms,
                    penalty_until: entry.penalty_until,
                    retry_in_ms: (entry.penalty_until - now).max(0),
                });
            }
        }
        out.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL: i64 = 30 * 60_000;
    const CAP: i64 = 4 * 60 * 60_000;

    #[test]
    fn first_failure_opens_with_initial_penalty() {
        let breaker = CircuitBreaker::default();
        let verdict = breaker.on_failure_at("p1", 0);
        assert_eq!(verdict.state, BreakerState::Open);
        assert_eq!(verdict.penalty_ms, INITIAL);
        assert_eq!(verdict.penalty_until, INITIAL);
        assert_eq!(breaker.state_at("p1", 1), BreakerState::Open);
    }

    #[test]
    fn second_failure_doubles_not_quadruples() {
        let breaker = CircuitBreaker::default();
        breaker.on_failure_at("p1", 0);
        let verdict = breaker.on_failure_at("p1", INITIAL + 1);
        assert_eq!(verdict.penalty_ms, INITIAL * 2);
    }

    #[test]
    fn penalty_is_capped() {
        let breaker = CircuitBreaker::default();
        let mut last = 0;
        for i in 0..12 {
            let verdict = breaker.on_failure_at("p1", i);
            last = verdict.penalty_ms;
            assert!(last >= INITIAL && last <= CAP);
        }
        assert_eq!(last, CAP);
    }

    #[test]
    fn doubling_follows_powers_of_two() {
        let breaker = CircuitBreaker::default();
        for k in 1..=5 {
            let verdict = breaker.on_failure_at("p1", 0);
            let expected = (INITIAL * (1 << (k - 1))).min(CAP);
            assert_eq!(verdict.penalty_ms, expected);
        }
    }

    #[test]
    fn open_becomes_half_open_after_penalty() {
        let breaker = CircuitBreaker::default();
        let verdict = breaker.on_failure_at("p1", 0);
        assert_eq!(breaker.state_at("p1", verdict.penalty_until - 1), BreakerState::Open);
        assert_eq!(breaker.state_at("p1", verdict.penalty_until), BreakerState::HalfOpen);
    }

    #[test]
    fn probe_success_resets_everything() {
        let breaker = CircuitBreaker::default();
        breaker.on_failure_at("p1", 0);
        breaker.on_failure_at("p1", 1);
        let half_open_at = INITIAL * 2 + 1;
        assert!(breaker.try_begin_probe_at("p1", half_open_at));
        // 探测在途时不允许第二个探测
        assert!(!breaker.try_begin_probe_at("p1", half_open_at));
        breaker.finish_probe_at("p1", true, half_open_at + 10);
        assert_eq!(breaker.state_at("p1", half_open_at + 11), BreakerState::Closed);

        let verdict = breaker.on_failure_at("p1", half_open_at + 20);
        assert_eq!(verdict.penalty_ms, INITIAL);
    }

    #[test]
    fn probe_failure_keeps_doubling() {
        let breaker = CircuitBreaker::default();
        breaker.on_failure_at("p1", 0);
        let half_open_at = INITIAL;
        assert!(breaker.try_begin_probe_at("p1", half_open_at));
        let verdict = breaker.finish_probe_at("p1", false, half_open_at).unwrap();
        assert_eq!(verdict.penalty_ms, INITIAL * 2);
        assert_eq!(verdict.state, BreakerState::Open);
    }

    #[test]
    fn recovery_restarts_penalty_at_initial() {
        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.on_failure_at("p1", 0);
        }
        // 处罚期过后探测成功，penalty 回到 initial
        let after = CAP + 1;
        assert!(breaker.try_begin_probe_at("p1", after));
        breaker.finish_probe_at("p1", true, after);

        // 再次失败从 initial 起步
        let verdict = breaker.on_failure_at("p1", after + 1);
        assert_eq!(verdict.penalty_ms, INITIAL);
    }

    #[test]
    fn resync_requested_at_threshold_once_per_cooldown() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.on_failure_at("p1", 0).should_resync);
        assert!(!breaker.on_failure_at("p1", 1).should_resync);
        assert!(breaker.on_failure_at("p1", 2).should_resync);
        // 冷却期内不再触发
        assert!(!breaker.on_failure_at("p1", 3).should_resync);
        // 冷却期过后允许再次触发
        assert!(breaker.on_failure_at("p1", 3 + 10 * 60_000 + 1).should_resync);
    }

    #[test]
    fn unknown_provider_is_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state_at("nobody", 0), BreakerState::Closed);
    }
}
