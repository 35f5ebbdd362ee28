//! 健康检查处理器

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{db, middleware::AppState};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// 存活 + 数据库探测
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match &state.db {
        Some(pool) => match db::ping(pool).await {
            Ok(()) => "up",
            Err(_) => "down",
        },
        None => "in_memory",
    };

    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(HealthResponse {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database,
        }),
    )
}
