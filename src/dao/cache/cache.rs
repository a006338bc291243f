//! # 内存 TTL 缓存
//!
//! moka 的轻量封装。网关里目前只有一个实例：`/v1/models` 的聚合
//! 响应缓存，键里带注册表快照版本和别名表哈希，30 秒过期；
//! 管理端 `/admin/cache/invalidate` 走 `invalidate_all` 整体清空。

use moka::future::Cache;
use std::time::Duration;
use std::sync::Arc;

#[derive(Clone)]
pub struct CacheService<K, V> {
    cache: Arc<Cache<K, V>>,
}

impl<K, V> CacheService<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// 新建缓存，条目在 ttl 后过期
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        CacheService {
            cache: Arc::new(cache),
        }
    }

    /// 获取缓存，未命中或已过期返回 None
    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    /// 获取缓存，未命中时调用 loader 加载并回填
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> V
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = V> + Send,
    {
        self.cache
            .get_with(key.clone(), async move { loader(key).await })
            .await
    }

    /// 写入（覆盖）一个条目
    pub async fn insert(&self, key: K, value: V) {
        self.cache.insert(key, value).await;
    }

    /// 删除某个 key
    pub async fn invalidate(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    /// 整体清空，管理端缓存失效接口使用
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
