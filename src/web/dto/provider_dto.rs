use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProviderRequest {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub model_blacklist: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProviderRequest {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_blacklist: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub status: String,
    pub models: Vec<String>,
    pub model_blacklist: Vec<String>,
    pub last_synced_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub created_at: Option<i64>,
}

impl From<crate::dao::provider::Provider> for ProviderResponse {
    fn from(p: crate::dao::provider::Provider) -> Self {
        let models = p.model_list();
        let model_blacklist = p.blacklist();
        Self {
            id: p.id,
            name: p.name,
            base_url: p.base_url,
            status: p.status,
            models,
            model_blacklist,
            last_synced_at: p.last_synced_at,
            last_used_at: p.last_used_at,
            created_at: p.created_at,
        }
    }
}

/// 导出条目：包含凭证，用于整体迁移
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderExportEntry {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub model_blacklist: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProvidersRequest {
    pub providers: Vec<ProviderExportEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSkipped {
    pub name: String,
    pub base_url: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProvidersResponse {
    pub imported: Vec<String>,
    pub skipped: Vec<ImportSkipped>,
    pub imported_count: usize,
    pub skipped_count: usize,
}
