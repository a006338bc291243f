use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

use crate::dao::metrics::delete_provider_metric;
use crate::dao::now_ms;
use crate::dao::provider::{get_all_providers, get_provider_by_id};
use crate::gateway::registry::ProviderPatch;
use crate::web::dto::provider_dto::*;
use crate::web::handlers::{ensure_admin, error_response};
use crate::web::server::AppState;

/// 获取所有providers
pub async fn list_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProviderResponse>>, Response> {
    ensure_admin(&state, &headers).await?;

    match get_all_providers(&state.pool).await {
        Ok(providers) => Ok(Json(providers.into_iter().map(ProviderResponse::from).collect())),
        Err(e) => {
            error!(error = %e, "failed to list providers");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// 获取单个provider
pub async fn get_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProviderResponse>, Response> {
    ensure_admin(&state, &headers).await?;

    match get_provider_by_id(&state.pool, &id).await {
        Ok(Some(provider)) => Ok(Json(ProviderResponse::from(provider))),
        Ok(None) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

/// 创建新的provider，入库即触发首轮模型同步
pub async fn create_new_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateProviderRequest>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    if request.name.trim().is_empty() || request.base_url.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "name and baseUrl are required.",
            "invalid_request_error",
            "invalid_provider",
        ));
    }

    match state
        .registry
        .create(
            &request.name,
            &request.base_url,
            &request.api_key,
            request.model_blacklist,
        )
        .await
    {
        Ok(provider) => {
            state.sync.schedule(&provider.id);
            Ok(Json(json!({
                "id": provider.id,
                "message": "Provider created successfully"
            })))
        }
        Err(e) => {
            error!(error = %e, "failed to create provider");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// 更新provider；身份字段变化后回到 pending 并重新同步
pub async fn update_existing_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateProviderRequest>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    let patch = ProviderPatch {
        name: request.name,
        base_url: request.base_url,
        api_key: request.api_key,
        model_blacklist: request.model_blacklist,
    };
    match state.registry.update(&id, patch).await {
        Ok(Some(_)) => {
            state.sync.schedule(&id);
            Ok(Json(json!({ "message": "Provider updated successfully" })))
        }
        Ok(None) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(e) => {
            error!(provider_id = %id, error = %e, "failed to update provider");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// 删除provider并回收其全部易失状态
pub async fn delete_existing_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    match state.registry.delete(&id).await {
        Ok(true) => {
            state.breaker.remove(&id);
            state.scorer.remove(&id);
            state.sink.forget_provider(&id);
            if let Err(e) = delete_provider_metric(&state.pool, &id).await {
                error!(provider_id = %id, error = %e, "failed to drop provider metrics");
            }
            Ok(Json(json!({ "message": "Provider deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(e) => {
            error!(provider_id = %id, error = %e, "failed to delete provider");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// 手动触发一次模型同步
pub async fn resync_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    match get_provider_by_id(&state.pool, &id).await {
        Ok(Some(_)) => {
            state.sync.schedule(&id);
            Ok(Json(json!({ "success": true })))
        }
        Ok(None) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

/// 导出全部供应商配置（含凭证）
pub async fn export_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    match get_all_providers(&state.pool).await {
        Ok(providers) => {
            let entries: Vec<ProviderExportEntry> = providers
                .into_iter()
                .map(|p| {
                    let model_blacklist = p.blacklist();
                    ProviderExportEntry {
                        name: p.name,
                        base_url: p.base_url,
                        api_key: p.api_key,
                        model_blacklist,
                    }
                })
                .collect();
            Ok(Json(json!({
                "exportedAt": now_ms(),
                "providers": entries
            })))
        }
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

/// 批量导入；相同 名称+地址 的条目跳过
pub async fn import_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ImportProvidersRequest>,
) -> Result<Json<ImportProvidersResponse>, Response> {
    ensure_admin(&state, &headers).await?;

    let existing = match get_all_providers(&state.pool).await {
        Ok(rows) => rows,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    };
    let mut seen: std::collections::HashSet<String> = existing
        .iter()
        .map(|p| format!("{}::{}", p.name.to_lowercase(), p.base_url))
        .collect();

    let mut imported = Vec::new();
    let mut skipped = Vec::new();

    for entry in request.providers {
        if entry.name.trim().is_empty()
            || entry.base_url.trim().is_empty()
            || entry.api_key.trim().is_empty()
        {
            skipped.push(ImportSkipped {
                name: entry.name,
                base_url: entry.base_url,
                reason: "missing required fields".to_string(),
            });
            continue;
        }
        let base_url = entry.base_url.trim().trim_end_matches('/').to_string();
        let dedup_key = format!("{}::{}", entry.name.to_lowercase(), base_url);
        if seen.contains(&dedup_key) {
            skipped.push(ImportSkipped {
                name: entry.name,
                base_url,
                reason: "provider with same name and baseUrl exists".to_string(),
            });
            continue;
        }
        match state
            .registry
            .create(&entry.name, &base_url, &entry.api_key, entry.model_blacklist)
            .await
        {
            Ok(provider) => {
                state.sync.schedule(&provider.id);
                seen.insert(dedup_key);
                imported.push(provider.id);
            }
            Err(e) => {
                error!(name = %entry.name, error = %e, "provider import failed");
                skipped.push(ImportSkipped {
                    name: entry.name,
                    base_url,
                    reason: "storage error".to_string(),
                });
            }
        }
    }

    let imported_count = imported.len();
    let skipped_count = skipped.len();
    Ok(Json(ImportProvidersResponse {
        imported,
        skipped,
        imported_count,
        skipped_count,
    }))
}
