//! 角色管理的 HTTP 处理器

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::{AppState, CurrentActor},
    models::role::*,
    services::role_service::permissions::{ROLE_MANAGE, ROLE_READ},
};

// ==================== Roles ====================

/// 列出所有角色
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_READ).await?;

    let roles = state.roles.list_roles().await?;

    Ok(Json(json!({
        "roles": roles,
        "count": roles.len()
    })))
}

/// 创建角色
pub async fn create_role(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let role = state.roles.create_role(&actor, req).await?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// 更新角色
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let role = state.roles.update_role(&actor, id, req).await?;

    Ok(Json(role))
}

/// 删除角色
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    state.roles.delete_role(&actor, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ==================== Role permissions ====================

/// 为角色添加权限
pub async fn grant_permission(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let granted = state
        .roles
        .grant_permission_to_role(&actor, role_id, permission_id)
        .await?;

    Ok(Json(json!({ "granted": granted })))
}

/// 从角色移除权限
pub async fn revoke_permission(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let revoked = state
        .roles
        .revoke_permission_from_role(&actor, role_id, permission_id)
        .await?;

    Ok(Json(json!({ "revoked": revoked })))
}

// ==================== Permissions ====================

/// 列出所有权限
pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_READ).await?;

    let permissions = state.roles.list_permissions().await?;

    Ok(Json(json!({
        "permissions": permissions,
        "count": permissions.len()
    })))
}

/// 创建权限
pub async fn create_permission(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<CreatePermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let permission = state.roles.create_permission(&actor, req).await?;

    Ok((StatusCode::CREATED, Json(permission)))
}

/// 删除权限
pub async fn delete_permission(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    state.roles.delete_permission(&actor, id).await?;

    Ok(StatusCode::NO_CONTENT)
}
