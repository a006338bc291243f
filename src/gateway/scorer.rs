//! # 路由评分
//!
//! 每个供应商维护一份指数加权的观测状态：
//! - 成功率 EWMA（初始 1.0）
//! - 成功请求的时延 EWMA（毫秒，无样本时视为未知）
//! - 最近一次采样时间，用于新鲜度衰减
//!
//! 评分 = 0.5·成功率 + 0.3·时延归一 + 0.2·新鲜度，落在 [0,1]。
//! 状态只存内存，重启后靠观测自然恢复。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::dao::now_ms;

/// EWMA 平滑系数
const EWMA_ALPHA: f64 = 0.2;
/// 时延归一基准：超过 10 秒记 0 分
const LATENCY_REF_MS: f64 = 10_000.0;
/// 新鲜度半衰期：24 小时
const FRESHNESS_HALF_LIFE_SECS: f64 = 86_400.0;
/// 分片数，减小热点供应商之间的锁竞争
const SHARD_COUNT: usize = 8;

/// 单个供应商的观测状态快照
#[derive(Debug, Clone)]
pub struct ProviderStats {
    pub ewma_success: f64,
    /// None 表示还没有成功样本
    pub ewma_latency_ms: Option<f64>,
    pub last_sample_at: Option<i64>,
    pub samples: u64,
    pub total_success: u64,
    pub total_failure: u64,
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self {
            ewma_success: 1.0,
            ewma_latency_ms: None,
            last_sample_at: None,
            samples: 0,
            total_success: 0,
            total_failure: 0,
        }
    }
}

pub struct RoutingScorer {
    shards: Vec<Mutex<HashMap<String, ProviderStats>>>,
}

impl Default for RoutingScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingScorer {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, provider_id: &str) -> &Mutex<HashMap<String, ProviderStats>> {
        let mut hasher = DefaultHasher::new();
        provider_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// 记录一次成功请求（时延为毫秒）
    pub fn observe_success(&self, provider_id: &str, duration_ms: i64) {
        self.observe_success_at(provider_id, duration_ms, now_ms());
    }

    pub fn observe_success_at(&self, provider_id: &str, duration_ms: i64, now: i64) {
        let mut shard = self.shard(provider_id).lock().unwrap();
        let stats = shard.entry(provider_id.to_string()).or_default();
        let sample = duration_ms.max(0) as f64;
        stats.ewma_latency_ms = Some(match stats.ewma_latency_ms {
            // 首个样本直接作为种子
            None => sample,
            Some(prev) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev,
        });
        stats.ewma_success = EWMA_ALPHA * 1.0 + (1.0 - EWMA_ALPHA) * stats.ewma_success;
        stats.last_sample_at = Some(now);
        stats.samples += 1;
        stats.total_success += 1;
    }

    /// 记录一次供应商侧失败；时延不更新
    pub fn observe_failure(&self, provider_id: &str) {
        self.observe_failure_at(provider_id, now_ms());
    }

    pub fn observe_failure_at(&self, provider_id: &str, now: i64) {
        let mut shard = self.shard(provider_id).lock().unwrap();
        let stats = shard.entry(provider_id.to_string()).or_default();
        stats.ewma_success = (1.0 - EWMA_ALPHA) * stats.ewma_success;
        stats.last_sample_at = Some(now);
        stats.samples += 1;
        stats.total_failure += 1;
    }

    /// 当前评分，未观测过的供应商得 0.65，保证会被尝试
    pub fn score(&self, provider_id: &str) -> f64 {
        self.score_at(provider_id, now_ms())
    }

    pub fn score_at(&self, provider_id: &str, now: i64) -> f64 {
        let shard = self.shard(provider_id).lock().unwrap();
        match shard.get(provider_id) {
            Some(stats) => score_of(stats, now),
            None => score_of(&ProviderStats::default(), now),
        }
    }

    /// 导出单个供应商的状态（管理与健康接口用）
    pub fn stats(&self, provider_id: &str) -> Option<ProviderStats> {
        self.shard(provider_id).lock().unwrap().get(provider_id).cloned()
    }

    /// 供应商删除时回收状态
    pub fn remove(&self, provider_id: &str) {
        self.shard(provider_id).lock().unwrap().remove(provider_id);
    }
}

fn score_of(stats: &ProviderStats, now: i64) -> f64 {
    let success = stats.ewma_success.clamp(0.0, 1.0);

    let lat_norm = match stats.ewma_latency_ms {
        Some(latency) => (1.0 - latency / LATENCY_REF_MS).clamp(0.0, 1.0),
        None => 0.5,
    };

    let freshness = match stats.last_sample_at {
        Some(at) => {
            let age_secs = ((now - at).max(0) as f64) / 1000.0;
            0.5_f64.powf(age_secs / FRESHNESS_HALF_LIFE_SECS)
        }
        None => 0.0,
    };

    0.5 * success + 0.3 * lat_norm + 0.2 * freshness
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_provider_scores_baseline() {
        let scorer = RoutingScorer::new();
        let score = scorer.score_at("p1", 0);
        assert!((score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn first_success_seeds_latency() {
        let scorer = RoutingScorer::new();
        scorer.observe_success_at("p1", 180, 1_000);
        let stats = scorer.stats("p1").unwrap();
        assert_eq!(stats.ewma_latency_ms, Some(180.0));
        assert!((stats.ewma_success - 1.0).abs() < 1e-9);
    }

    #[test]
    fn failure_decays_success_but_not_latency() {
        let scorer = RoutingScorer::new();
        scorer.observe_success_at("p1", 200, 1_000);
        scorer.observe_failure_at("p1", 2_000);
        let stats = scorer.stats("p1").unwrap();
        assert!((stats.ewma_success - 0.8).abs() < 1e-9);
        assert_eq!(stats.ewma_latency_ms, Some(200.0));
    }

    #[test]
    fn success_rate_stays_in_unit_interval() {
        let scorer = RoutingScorer::new();
        let now = 0;
        for i in 0..200 {
            if i % 3 == 0 {
                scorer.observe_failure_at("p1", now + i);
            } else {
                scorer.observe_success_at("p1", 50 + i, now + i);
            }
            let stats = scorer.stats("p1").unwrap();
            assert!(stats.ewma_success >= 0.0 && stats.ewma_success <= 1.0);
            let score = scorer.score_at("p1", now + i);
            assert!(score >= 0.0 && score <= 1.0);
        }
    }

    #[test]
    fn staleness_lowers_score() {
        let scorer = RoutingScorer::new();
        scorer.observe_success_at("p1", 100, 0);
        let fresh = scorer.score_at("p1", 0);
        let day_later = scorer.score_at("p1", 86_400_000);
        let week_later = scorer.score_at("p1", 7 * 86_400_000);
        assert!(fresh > day_later);
        assert!(day_later > week_later);
        // 24 小时正好衰减一半的新鲜度权重
        assert!((fresh - day_later - 0.1).abs() < 1e-6);
    }

    #[test]
    fn slower_provider_scores_lower() {
        let scorer = RoutingScorer::new();
        scorer.observe_success_at("fast", 100, 0);
        scorer.observe_success_at("slow", 9_000, 0);
        assert!(scorer.score_at("fast", 0) > scorer.score_at("slow", 0));
    }
}
