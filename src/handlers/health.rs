use axum::{extract::State, Json};
use chrono::Utc;

use crate::{handlers::AppState, models::{Currency, HealthStatus}};

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let store_ok = state.payments.store().ping().await;
    let eth_sources = state.oracle.source_count(Currency::Eth);
    let sol_sources = state.oracle.source_count(Currency::Sol);

    let status = if store_ok && eth_sources > 0 && sol_sources > 0 {
        "healthy"
    } else if store_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store_ok,
        eth_sources,
        sol_sources,
        active_monitors: state.payments.monitor().active_count(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}
