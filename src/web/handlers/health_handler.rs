use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::gateway::breaker::BreakerState;
use crate::web::server::AppState;

/// 健康检查：供应商与熔断状态、全局时延分位数
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    let mut breakers_open = 0usize;
    let mut providers: Vec<Value> = Vec::new();

    for provider in snapshot.providers.values() {
        let breaker_state = state.breaker.state(&provider.id);
        if breaker_state == BreakerState::Open {
            breakers_open += 1;
        }
        let percentiles = state.sink.provider_percentiles(&provider.id);
        providers.push(json!({
            "id": provider.id,
            "name": provider.name,
            "status": provider.status,
            "state": breaker_state.as_str(),
            "score": (state.scorer.score(&provider.id) * 10_000.0).round() / 10_000.0,
            "p50": percentiles.p50,
            "p90": percentiles.p90,
            "p99": percentiles.p99,
        }));
    }
    providers.sort_by(|a, b| {
        a["id"].as_str().unwrap_or("").cmp(b["id"].as_str().unwrap_or(""))
    });

    let status = if !snapshot.providers.is_empty() && snapshot.active_count() == 0 {
        "degraded"
    } else if breakers_open > 0 {
        "degraded"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "providers": providers,
        "breakers_open": breakers_open,
        "latency": serde_json::to_value(state.sink.latency_percentiles()).unwrap_or_default(),
    }))
}
