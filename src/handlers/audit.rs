//! 审计日志查询处理器

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::AppError,
    middleware::{AppState, CurrentActor},
    models::audit::{AuditLogPage, AuditLogQuery},
    services::workflow_service::permissions::AUDIT_READ,
};

/// 查询审计日志
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, AUDIT_READ).await?;

    let (filters, limit, offset) = query.into_parts();
    state.audit.flush().await;
    let items = state.audit.query(&filters, limit, offset).await?;
    let total = state.audit.count(&filters).await?;

    Ok(Json(AuditLogPage { items, total }))
}
