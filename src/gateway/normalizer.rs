//! # 模型名归一化
//!
//! 上游供应商对同一个模型经常使用不同写法（厂商前缀、版本后缀、
//! `latest`/`preview` 之类的变体标记）。这里把原始模型名收敛成
//! 规范 id，并为一组别名建立正反向映射，路由和 `/v1/models` 去重
//! 都基于规范 id 进行。

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// 默认的变体标记，出现在模型名里时不参与规范 id
const DEFAULT_VARIANT_TOKENS: &[&str] = &[
    "latest", "default", "stable", "fast", "turbo", "slow", "high", "low",
    "medium", "mini", "lite", "light", "pro", "ultra", "think", "thinking",
    "instruct", "chat", "online", "beta", "preview", "docs", "free", "max",
    "xhigh",
];

/// 一次归一化的完整结果
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedModel {
    pub raw: String,
    /// 去前缀、转小写后的形态
    pub cleaned: String,
    /// 规范 id，路由键
    pub canonical: String,
    /// 去掉版本号后的家族键，别名归组用
    pub family_key: String,
    /// 首个版本号各段，如 "4.1" -> [4, 1]
    pub version_parts: Vec<u32>,
}

/// 同族模型的别名映射
#[derive(Debug, Clone, Default)]
pub struct ModelAliasMaps {
    /// 规范 id -> 该族全部原始写法
    pub canonical_to_variants: HashMap<String, BTreeSet<String>>,
    /// 任意写法（原始或归一化后）-> 规范 id
    pub variant_to_canonical: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    variant_tokens: BTreeSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            variant_tokens: DEFAULT_VARIANT_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 使用自定义变体标记表构建
    pub fn with_tokens<I: IntoIterator<Item = String>>(tokens: I) -> Self {
        Self {
            variant_tokens: tokens.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    /// 标记表的哈希，表内容变化时缓存据此失效
    pub fn table_hash(&self) -> String {
        let mut hasher = Sha256::default();
        for token in &self.variant_tokens {
            hasher.update(token.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// 归一化单个模型名
    pub fn normalize(&self, raw: &str) -> NormalizedModel {
        let cleaned = strip_listing_prefix(raw.trim()).to_lowercase();

        // 厂商前缀只取最后一段，openai/gpt-4o 与 gpt-4o 等价
        let without_vendor = match cleaned.rsplit('/').next() {
            Some(tail) if !tail.is_empty() => tail.to_string(),
            _ => cleaned.clone(),
        };

        let tokens: Vec<&str> = without_vendor
            .split(|c: char| c == '-' || c == '_' || c == ':' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        let mut version_parts: Vec<u32> = Vec::new();
        let mut canonical_tokens: Vec<&str> = Vec::new();
        let mut family_tokens: Vec<&str> = Vec::new();

        for token in tokens {
            // 纯数字且位数很长的一般是日期戳，直接丢弃
            if token.len() >= 4 && token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            if let Some(version) = parse_version(token) {
                if version_parts.is_empty() {
                    version_parts = version;
                }
                canonical_tokens.push(token);
                continue;
            }

            if self.variant_tokens.contains(token) {
                continue;
            }

            canonical_tokens.push(token);
            family_tokens.push(token);
        }

        let canonical = if canonical_tokens.is_empty() {
            without_vendor.clone()
        } else {
            canonical_tokens.join("-")
        };
        let family_key = if family_tokens.is_empty() {
            without_vendor.clone()
        } else {
            family_tokens.join("-")
        };

        NormalizedModel {
            raw: raw.to_string(),
            cleaned,
            canonical,
            family_key,
            version_parts,
        }
    }

    /// 只取规范 id
    pub fn canonical(&self, raw: &str) -> String {
        self.normalize(raw).canonical
    }

    /// 对多个供应商的模型列表建立别名映射
    pub fn build_alias_maps<'a, I>(&self, model_lists: I) -> ModelAliasMaps
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        struct FamilyEntry {
            variants: BTreeSet<String>,
            candidates: Vec<(String, Vec<u32>)>,
        }

        let mut families: HashMap<String, FamilyEntry> = HashMap::new();

        for models in model_lists {
            for raw in models {
                let info = self.normalize(raw);
                let family_key = if info.family_key.is_empty() {
                    info.canonical.clone()
                } else {
                    info.family_key.clone()
                };
                let entry = families.entry(family_key).or_insert_with(|| FamilyEntry {
                    variants: BTreeSet::new(),
                    candidates: Vec::new(),
                });
                entry.variants.insert(raw.clone());
                entry.candidates.push((info.canonical, info.version_parts));
            }
        }

        let mut maps = ModelAliasMaps::default();
        for (_, entry) in families {
            // 带版本号的候选里选最高版本作为族代表
            let preferred = entry
                .candidates
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .max_by(|a, b| compare_version_parts(&a.1, &b.1))
                .or_else(|| entry.candidates.first())
                .cloned();
            let Some((canonical, _)) = preferred else { continue };

            for variant in &entry.variants {
                let norm = self.normalize(variant).canonical;
                maps.variant_to_canonical.insert(norm, canonical.clone());
                maps.variant_to_canonical.insert(variant.clone(), canonical.clone());
            }
            maps.variant_to_canonical.insert(canonical.clone(), canonical.clone());
            maps.canonical_to_variants.insert(canonical, entry.variants);
        }
        maps
    }
}

/// 去掉 models/、model/、m/ 这类列表前缀
fn strip_listing_prefix(raw: &str) -> &str {
    let lower = raw.to_lowercase();
    for prefix in ["models/", "model/", "m/"] {
        if lower.starts_with(prefix) {
            return &raw[prefix.len()..];
        }
    }
    raw
}

/// 解析版本 token：v4、4.1、3.5 之类；返回各段数字
fn parse_version(token: &str) -> Option<Vec<u32>> {
    let body = token.strip_prefix('v').unwrap_or(token);
    if body.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    for piece in body.split('.') {
        if piece.is_empty() || !piece.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        parts.push(piece.parse::<u32>().ok()?);
    }
    Some(parts)
}

/// 逐段比较版本号，缺段按 0 处理
pub fn compare_version_parts(a: &[u32], b: &[u32]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let av = a.get(i).copied().unwrap_or(0);
        let bv = b.get(i).copied().unwrap_or(0);
        match av.cmp(&bv) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_vendor_prefix() {
        let n = Normalizer::new();
        assert_eq!(n.canonical("openai/gpt-4o"), n.canonical("gpt-4o"));
        assert_eq!(n.canonical("models/gemini-1.5-flash"), n.canonical("gemini-1.5-flash"));
    }

    #[test]
    fn drops_variant_tokens_and_date_tags() {
        let n = Normalizer::new();
        let info = n.normalize("GPT-4o-mini-20240718");
        assert_eq!(info.canonical, "gpt-4o");
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = Normalizer::new();
        for raw in ["openai/GPT-4o-mini", "llama3.1:latest", "m/qwen-turbo-2024"] {
            let once = n.canonical(raw);
            assert_eq!(n.canonical(&once), once);
        }
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("4"), Some(vec![4]));
        assert_eq!(parse_version("v3.5"), Some(vec![3, 5]));
        assert_eq!(parse_version("4o"), None);
        assert_eq!(parse_version("o1"), None);
    }

    #[test]
    fn table_hash_tracks_content() {
        let a = Normalizer::new();
        let b = Normalizer::new();
        assert_eq!(a.table_hash(), b.table_hash());

        let c = Normalizer::with_tokens(vec!["latest".to_string()]);
        assert_ne!(a.table_hash(), c.table_hash());
    }
}
