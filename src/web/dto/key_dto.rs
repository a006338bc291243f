use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CreateKeyRequest {
    /// 不提供时由服务端生成
    pub key: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResponse {
    pub id: String,
    pub description: Option<String>,
    pub created_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

/// 创建响应，明文只在这里出现一次
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedKeyResponse {
    pub id: String,
    pub key: String,
    pub description: Option<String>,
}
