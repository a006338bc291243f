use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use anyhow::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tracing::info;

use crate::config::GatewayConfig;
use crate::dao::cache::CacheService;
use crate::gateway::breaker::CircuitBreaker;
use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::limiter::SlidingWindowLimiter;
use crate::gateway::proxy::UpstreamProxy;
use crate::gateway::registry::ProviderRegistry;
use crate::gateway::scorer::RoutingScorer;
use crate::gateway::sink::LogSink;
use crate::gateway::sync::ModelSync;
use crate::web::{
    handlers::{
        breaker_handler::{get_breaker_status, invalidate_cache, reset_breaker},
        chat_handler::{chat_completions, list_models},
        health_handler::health_check,
        key_handler::{create_key, delete_key, list_keys},
        log_handler::{get_metrics, list_request_log_entries, list_sync_log_entries},
        provider_handler::{
            create_new_provider, delete_existing_provider, export_providers, get_provider,
            import_providers, list_providers, resync_provider, update_existing_provider,
        },
        setting_handler::{get_settings, set_setting_value},
    },
    middleware::{
        cors::cors_layer, rate_limit::rate_limit_middleware,
        request_log::request_log_middleware, trace::trace_middleware,
    },
};

/// 注入所有处理器的共享状态
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<SqlitePool>,
    pub config: GatewayConfig,
    pub registry: Arc<ProviderRegistry>,
    pub scorer: Arc<RoutingScorer>,
    pub breaker: Arc<CircuitBreaker>,
    pub dispatcher: Arc<Dispatcher>,
    /// 限流器可随 settings 热替换
    pub limiter: Arc<RwLock<Arc<SlidingWindowLimiter>>>,
    pub sink: LogSink,
    pub sync: ModelSync,
    pub proxy: Arc<UpstreamProxy>,
    /// /v1/models 响应缓存，键含快照版本
    pub models_cache: CacheService<String, Value>,
}

pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn start(&self, addr: SocketAddr) -> Result<()> {
        let app = self.create_app();

        info!("gateway listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    pub fn create_app(&self) -> Router {
        let state = self.state.clone();

        // 公开 OpenAI 兼容面
        let public_routes = Router::new()
            .route("/v1/models", get(list_models))
            .route("/v1/chat/completions", post(chat_completions));

        // 管理面
        let admin_routes = Router::new()
            .route("/providers", get(list_providers).post(create_new_provider))
            .route("/providers/export", get(export_providers))
            .route("/providers/import", post(import_providers))
            .route(
                "/providers/:id",
                get(get_provider)
                    .patch(update_existing_provider)
                    .delete(delete_existing_provider),
            )
            .route("/providers/:id/resync", post(resync_provider))
            .route("/request-logs", get(list_request_log_entries))
            .route("/sync-logs", get(list_sync_log_entries))
            .route("/metrics", get(get_metrics))
            .route("/keys", get(list_keys).post(create_key))
            .route("/keys/:id", delete(delete_key))
            .route("/settings", get(get_settings).post(set_setting_value))
            .route("/circuit-breaker", get(get_breaker_status))
            .route("/circuit-breaker/:provider_id/reset", post(reset_breaker))
            .route("/cache/invalidate", post(invalidate_cache));

        Router::new()
            .merge(public_routes)
            .nest("/admin", admin_routes)
            .route("/health", get(health_check))
            .layer(
                ServiceBuilder::new()
                    .layer(cors_layer())
                    .layer(from_fn(trace_middleware))
                    .layer(from_fn_with_state(state.clone(), request_log_middleware))
                    .layer(from_fn_with_state(state.clone(), rate_limit_middleware)),
            )
            .with_state(state)
    }
}
