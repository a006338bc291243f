//! # 模型列表同步
//!
//! 拉取上游 `GET {base_url}/v1/models`，归一化去重、剔除黑名单和
//! 非聊天模型后落库，并为每个增删的模型写一条同步日志。
//! 同一供应商 5 秒内至多发起一次同步，重复触发自动合并；全量同步
//! 的并发度由信号量限制。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dao::now_ms;
use crate::dao::provider::get_provider_by_id;
use crate::dao::setting::{get_setting_number, SETTING_PERIODIC_SYNC_INTERVAL_HOURS};
use crate::dao::sync_log::{SyncLog, SYNC_ERROR, SYNC_OK};
use crate::gateway::registry::ProviderRegistry;
use crate::gateway::sink::LogSink;

/// 上游拉取超时
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// 同一供应商两次同步之间的最短间隔
const MIN_SYNC_SPACING_MS: i64 = 5_000;
/// 周期性全量同步的并发上限
const PERIODIC_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct ModelSync {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    registry: Arc<ProviderRegistry>,
    sink: LogSink,
    client: reqwest::Client,
    inflight: Mutex<HashSet<String>>,
    last_started: Mutex<HashMap<String, i64>>,
    semaphore: Arc<Semaphore>,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl ModelSync {
    pub fn new(registry: Arc<ProviderRegistry>, sink: LogSink) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            inner: Arc::new(SyncInner {
                registry,
                sink,
                client,
                inflight: Mutex::new(HashSet::new()),
                last_started: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(PERIODIC_CONCURRENCY)),
            }),
        })
    }

    /// 后台触发一次同步；在途或 5 秒内刚同步过则直接合并
    pub fn schedule(&self, provider_id: &str) {
        let now = now_ms();
        {
            let last = self.inner.last_started.lock().unwrap();
            if let Some(started) = last.get(provider_id) {
                if now - started < MIN_SYNC_SPACING_MS {
                    return;
                }
            }
        }
        {
            let mut inflight = self.inner.inflight.lock().unwrap();
            if !inflight.insert(provider_id.to_string()) {
                return;
            }
        }
        let inner = self.inner.clone();
        let provider_id = provider_id.to_string();
        tokio::spawn(async move {
            let _permit = inner.semaphore.clone().acquire_owned().await;
            inner
                .last_started
                .lock()
                .unwrap()
                .insert(provider_id.clone(), now_ms());
            inner.sync_provider(&provider_id).await;
            inner.inflight.lock().unwrap().remove(&provider_id);
        });
    }

    /// 为全部供应商排一轮同步
    pub async fn sync_all(&self) {
        let snapshot = self.inner.registry.snapshot();
        for provider_id in snapshot.providers.keys() {
            self.schedule(provider_id);
        }
    }

    /// 周期性全量同步，间隔小时数每轮从 settings 重新读取
    pub fn start_periodic(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let hours = get_setting_number(
                    this.inner.registry.pool(),
                    SETTING_PERIODIC_SYNC_INTERVAL_HOURS,
                    1,
                )
                .await
                .unwrap_or(1)
                .max(1);
                tokio::time::sleep(Duration::from_secs((hours as u64) * 3600)).await;
                info!("periodic model sync round started");
                this.sync_all().await;
            }
        });
    }
}

impl SyncInner {
    async fn sync_provider(&self, provider_id: &str) {
        let provider = match get_provider_by_id(self.registry.pool(), provider_id).await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                warn!(provider_id = %provider_id, error = %e, "sync aborted, provider lookup failed");
                return;
            }
        };

        let old_models: HashSet<String> = provider.model_list().into_iter().collect();

        match self.fetch_models(&provider.base_url, &provider.api_key).await {
            Ok(raw_models) => {
                let normalizer = self.registry.normalizer();
                let blacklist: HashSet<String> = provider
                    .blacklist()
                    .iter()
                    .map(|m| normalizer.canonical(m))
                    .collect();

                let mut seen = HashSet::new();
                let mut models = Vec::new();
                for raw in raw_models {
                    let trimmed = raw.trim().to_string();
                    if trimmed.is_empty() || !seen.insert(trimmed.clone()) {
                        continue;
                    }
                    if is_non_chat_model(&trimmed) {
                        continue;
                    }
                    if blacklist.contains(&normalizer.canonical(&trimmed)) {
                        continue;
                    }
                    models.push(trimmed);
                }

                let new_set: HashSet<String> = models.iter().cloned().collect();
                for added in new_set.difference(&old_models) {
                    self.log_sync(&provider.id, &provider.name, added, SYNC_OK, "model discovered");
                }
                for removed in old_models.difference(&new_set) {
                    self.log_sync(
                        &provider.id,
                        &provider.name,
                        removed,
                        SYNC_OK,
                        "model no longer advertised",
                    );
                }

                if let Err(e) = self.registry.apply_sync_success(&provider.id, &models).await {
                    warn!(provider_id = %provider.id, error = %e, "failed to persist synced models");
                    return;
                }
                info!(
                    provider_id = %provider.id,
                    provider = %provider.name,
                    models = models.len(),
                    "model sync completed"
                );
            }
            Err(e) => {
                warn!(provider_id = %provider.id, provider = %provider.name, error = %e, "model sync failed");
                self.log_sync(&provider.id, &provider.name, "ALL", SYNC_ERROR, &e.to_string());
                if let Err(err) = self.registry.apply_sync_failure(&provider.id).await {
                    warn!(provider_id = %provider.id, error = %err, "failed to record sync failure");
                }
            }
        }
    }

    async fn fetch_models(&self, base_url: &str, api_key: &str) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
        let response = self.client.get(&url).bearer_auth(api_key).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("upstream responded with {}", response.status());
        }
        let page: ModelsPage = response.json().await?;
        Ok(page.data.into_iter().map(|m| m.id).collect())
    }

    fn log_sync(&self, provider_id: &str, provider_name: &str, model: &str, result: &str, message: &str) {
        self.sink.log_sync(SyncLog {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.to_string(),
            provider_name: provider_name.to_string(),
            model: model.to_string(),
            result: result.to_string(),
            message: message.to_string(),
            created_at: now_ms(),
        });
    }
}

/// embedding 类模型无法服务聊天端点，同步时直接剔除
fn is_non_chat_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("embedding") || lower.contains("embed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_filtered() {
        assert!(is_non_chat_model("text-embedding-3-small"));
        assert!(is_non_chat_model("nomic-embed-text"));
        assert!(!is_non_chat_model("gpt-4o-mini"));
    }
}
