//! 投诉工作流的 HTTP 处理器
//! 处理器只做参数解析，业务规则全部在 ComplaintWorkflowService 中

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::{AppState, CurrentActor},
    models::{audit::AuditLogQuery, complaint::*},
};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 获取工单
pub async fn get_complaint(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let complaint = state.workflow.get_complaint(&actor, id).await?;
    Ok(Json(complaint))
}

/// 工单审计历史
pub async fn history(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (_, limit, offset) = AuditLogQuery {
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    }
    .into_parts();

    let page = state.workflow.history(&actor, id, limit, offset).await?;
    Ok(Json(page))
}

pub async fn assign(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignComplaintRequest>,
) -> Result<impl IntoResponse, AppError> {
    let complaint = state.workflow.assign(&actor, id, req).await?;
    Ok(Json(complaint))
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveComplaintRequest>,
) -> Result<impl IntoResponse, AppError> {
    let complaint = state.workflow.resolve(&actor, id, req).await?;
    Ok(Json(complaint))
}

/// 关闭工单（请求体可省略）
pub async fn close(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    req: Option<Json<CloseComplaintRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let complaint = state.workflow.close(&actor, id, req).await?;
    Ok(Json(complaint))
}

pub async fn reopen(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<ReopenComplaintRequest>,
) -> Result<impl IntoResponse, AppError> {
    let complaint = state.workflow.reopen(&actor, id, req).await?;
    Ok(Json(complaint))
}

pub async fn escalate(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<EscalateComplaintRequest>,
) -> Result<impl IntoResponse, AppError> {
    let complaint = state.workflow.escalate(&actor, id, req).await?;
    Ok(Json(complaint))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let complaint = state.workflow.change_status(&actor, id, req).await?;
    Ok(Json(complaint))
}
