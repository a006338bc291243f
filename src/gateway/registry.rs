//! # 供应商注册表
//!
//! 数据库里的 providers 表是事实来源，这里在内存中维护一份不可变
//! 快照（含 规范模型 -> 供应商 倒排索引）。写路径先落库再整体重建
//! 快照；读路径只克隆一个 Arc，完全无锁等待。

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dao::now_ms;
use crate::dao::provider::{
    create_provider, delete_provider, get_all_providers, get_provider_by_id,
    remove_provider_model, touch_provider_used, update_provider, update_provider_models,
    update_provider_status, Provider, STATUS_ACTIVE, STATUS_ERROR, STATUS_PENDING,
};
use crate::gateway::normalizer::{ModelAliasMaps, Normalizer};

/// 调度视角的供应商视图，来自快照
#[derive(Debug, Clone)]
pub struct ProviderView {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub status: String,
    /// 有效模型集：广告列表减黑名单后的原始 id
    pub models: Vec<String>,
    pub blacklist: Vec<String>,
    pub last_synced_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub created_at: Option<i64>,
}

impl ProviderView {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// 不可变快照
pub struct RegistrySnapshot {
    /// 每次重建递增，/v1/models 缓存以此为键
    pub version: u64,
    pub providers: HashMap<String, ProviderView>,
    /// 规范模型 id -> 供应商 id 列表
    pub by_model: HashMap<String, Vec<String>>,
    pub alias: ModelAliasMaps,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            providers: HashMap::new(),
            by_model: HashMap::new(),
            alias: ModelAliasMaps::default(),
        }
    }

    /// 把请求里的模型名解析成路由用的规范 id
    pub fn resolve_canonical(&self, normalized: &str) -> String {
        self.alias
            .variant_to_canonical
            .get(normalized)
            .cloned()
            .unwrap_or_else(|| normalized.to_string())
    }

    /// 某供应商名下与规范 id 同族的原始写法
    pub fn variants_of(&self, provider: &ProviderView, canonical: &str) -> Vec<String> {
        let family: BTreeSet<&String> = match self.alias.canonical_to_variants.get(canonical) {
            Some(variants) => variants.iter().collect(),
            None => return Vec::new(),
        };
        provider
            .models
            .iter()
            .filter(|m| family.contains(m))
            .cloned()
            .collect()
    }

    /// 全部活跃供应商有效模型集的并集（规范 id，有序去重）
    pub fn active_model_union(&self) -> Vec<String> {
        let mut out: BTreeSet<String> = BTreeSet::new();
        for provider in self.providers.values() {
            if !provider.is_active() {
                continue;
            }
            for raw in &provider.models {
                out.insert(self.resolve_canonical_raw(raw));
            }
        }
        out.into_iter().collect()
    }

    fn resolve_canonical_raw(&self, raw: &str) -> String {
        self.alias
            .variant_to_canonical
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    pub fn active_count(&self) -> usize {
        self.providers.values().filter(|p| p.is_active()).count()
    }
}

pub struct ProviderRegistry {
    pool: Arc<SqlitePool>,
    normalizer: Arc<Normalizer>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    version: AtomicU64,
    /// last_used 的内存覆盖层，数据库异步落盘，快照重建时合入
    last_used: Mutex<HashMap<String, i64>>,
}

/// 管理接口的更新载荷
#[derive(Debug, Default, Clone)]
pub struct ProviderPatch {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_blacklist: Option<Vec<String>>,
}

impl ProviderRegistry {
    pub fn new(pool: Arc<SqlitePool>, normalizer: Arc<Normalizer>) -> Self {
        Self {
            pool,
            normalizer,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            version: AtomicU64::new(0),
            last_used: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// 从数据库整体重建快照
    pub async fn reload(&self) -> anyhow::Result<Arc<RegistrySnapshot>> {
        let rows = get_all_providers(&self.pool).await?;
        let snapshot = Arc::new(self.build_snapshot(rows));
        *self.snapshot.write().unwrap() = snapshot.clone();
        Ok(snapshot)
    }

    fn build_snapshot(&self, rows: Vec<Provider>) -> RegistrySnapshot {
        let overlay = self.last_used.lock().unwrap().clone();
        let mut providers: HashMap<String, ProviderView> = HashMap::new();

        for row in rows {
            let blacklist = row.blacklist();
            let blacklist_canonical: BTreeSet<String> = blacklist
                .iter()
                .map(|m| self.normalizer.canonical(m))
                .collect();

            // 有效模型集 = 广告集 − 黑名单，原始重复写法去重
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut models: Vec<String> = Vec::new();
            for raw in row.model_list() {
                let canonical = self.normalizer.canonical(&raw);
                if blacklist_canonical.contains(&canonical) {
                    continue;
                }
                if seen.insert(raw.clone()) {
                    models.push(raw);
                }
            }

            let last_used_at = match overlay.get(&row.id) {
                Some(mem) => Some((*mem).max(row.last_used_at.unwrap_or(0))),
                None => row.last_used_at,
            };

            providers.insert(
                row.id.clone(),
                ProviderView {
                    id: row.id,
                    name: row.name,
                    base_url: row.base_url,
                    api_key: row.api_key,
                    status: row.status,
                    models,
                    blacklist,
                    last_synced_at: row.last_synced_at,
                    last_used_at,
                    created_at: row.created_at,
                },
            );
        }

        let model_lists: Vec<&[String]> = providers.values().map(|p| p.models.as_slice()).collect();
        let alias = self.normalizer.build_alias_maps(model_lists);

        let mut by_model: HashMap<String, Vec<String>> = HashMap::new();
        for provider in providers.values() {
            let mut canonicals: BTreeSet<String> = BTreeSet::new();
            for raw in &provider.models {
                let canonical = alias
                    .variant_to_canonical
                    .get(raw)
                    .cloned()
                    .unwrap_or_else(|| self.normalizer.canonical(raw));
                canonicals.insert(canonical);
            }
            for canonical in canonicals {
                by_model.entry(canonical).or_default().push(provider.id.clone());
            }
        }

        RegistrySnapshot {
            version: self.version.fetch_add(1, Ordering::Relaxed) + 1,
            providers,
            by_model,
            alias,
        }
    }

    /// 给定规范模型的候选供应商（不筛状态，调度器自行过滤）
    pub fn providers_for(&self, canonical: &str) -> Vec<ProviderView> {
        let snapshot = self.snapshot();
        let Some(ids) = snapshot.by_model.get(canonical) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| snapshot.providers.get(id).cloned())
            .collect()
    }

    /// 新建供应商，初始状态 pending
    pub async fn create(
        &self,
        name: &str,
        base_url: &str,
        api_key: &str,
        model_blacklist: Vec<String>,
    ) -> anyhow::Result<Provider> {
        let cleaned_blacklist: Vec<String> = model_blacklist
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        let provider = Provider {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            models: "[]".to_string(),
            model_blacklist: serde_json::to_string(&cleaned_blacklist)?,
            status: STATUS_PENDING.to_string(),
            last_synced_at: None,
            last_used_at: None,
            created_at: Some(now_ms()),
        };
        create_provider(&self.pool, &provider).await?;
        self.reload().await?;
        info!(provider_id = %provider.id, name = %provider.name, "provider registered");
        Ok(provider)
    }

    /// 更新供应商；身份字段变化后回到 pending 并等待重新同步
    pub async fn update(&self, id: &str, patch: ProviderPatch) -> anyhow::Result<Option<Provider>> {
        let Some(existing) = get_provider_by_id(&self.pool, id).await? else {
            return Ok(None);
        };

        let blacklist_json = match &patch.model_blacklist {
            Some(list) => {
                let cleaned: Vec<String> = list
                    .iter()
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
                serde_json::to_string(&cleaned)?
            }
            None => existing.model_blacklist.clone(),
        };

        let next = Provider {
            id: existing.id.clone(),
            name: patch.name.unwrap_or(existing.name),
            base_url: patch
                .base_url
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .unwrap_or(existing.base_url),
            api_key: patch.api_key.unwrap_or(existing.api_key),
            models: "[]".to_string(),
            model_blacklist: blacklist_json,
            status: STATUS_PENDING.to_string(),
            last_synced_at: None,
            last_used_at: existing.last_used_at,
            created_at: existing.created_at,
        };
        update_provider(&self.pool, id, &next).await?;
        self.reload().await?;
        Ok(get_provider_by_id(&self.pool, id).await?)
    }

    /// 删除供应商并回收其内存状态
    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let rows = delete_provider(&self.pool, id).await?;
        if rows > 0 {
            self.last_used.lock().unwrap().remove(id);
            self.reload().await?;
        }
        Ok(rows > 0)
    }

    /// 成功调度后登记使用时间：覆盖层即时生效，数据库异步落盘
    pub fn touch_used(&self, id: &str) {
        let now = now_ms();
        self.last_used.lock().unwrap().insert(id.to_string(), now);
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = touch_provider_used(&pool, &id, now).await {
                warn!(provider_id = %id, error = %e, "failed to persist last_used_at");
            }
        });
    }

    /// 上游回报 model_not_found：从有效集中剔除该族模型
    pub async fn strip_model(&self, provider_id: &str, model: &str) -> anyhow::Result<bool> {
        let Some(provider) = get_provider_by_id(&self.pool, provider_id).await? else {
            return Ok(false);
        };
        let canonical = self.normalizer.canonical(model);
        let before = provider.model_list();
        let after: Vec<String> = before
            .iter()
            .filter(|m| self.normalizer.canonical(m) != canonical)
            .cloned()
            .collect();
        if after.len() == before.len() {
            return Ok(false);
        }
        let models_json = serde_json::to_string(&after)?;
        remove_provider_model(&self.pool, provider_id, &models_json).await?;
        self.reload().await?;
        warn!(provider_id = %provider_id, model = %model, "model stripped after upstream 404");
        Ok(true)
    }

    /// 同步成功：落地新模型列表，状态转 active
    pub async fn apply_sync_success(
        &self,
        provider_id: &str,
        models: &[String],
    ) -> anyhow::Result<()> {
        let models_json = serde_json::to_string(models)?;
        update_provider_models(&self.pool, provider_id, STATUS_ACTIVE, &models_json, now_ms())
            .await?;
        self.reload().await?;
        Ok(())
    }

    /// 同步失败：保留旧模型列表；pending 的供应商转 error
    pub async fn apply_sync_failure(&self, provider_id: &str) -> anyhow::Result<()> {
        if let Some(provider) = get_provider_by_id(&self.pool, provider_id).await? {
            if provider.status == STATUS_PENDING {
                update_provider_status(&self.pool, provider_id, STATUS_ERROR).await?;
                self.reload().await?;
            }
        }
        Ok(())
    }

    /// 启动时恢复快照，失败属于致命错误
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        match self.reload().await {
            Ok(snapshot) => {
                info!(
                    providers = snapshot.providers.len(),
                    models = snapshot.by_model.len(),
                    "provider registry loaded"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "provider registry bootstrap failed");
                Err(e)
            }
        }
    }
}
