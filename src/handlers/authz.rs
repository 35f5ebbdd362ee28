//! 权限检查与用户角色的 HTTP 处理器

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::{AppState, CurrentActor},
    models::{
        access::{AccessContext, CheckPermissionRequest},
        role::AssignRoleRequest,
    },
    services::role_service::permissions::{ROLE_MANAGE, ROLE_READ},
};

/// 检查当前用户的权限
///
/// 请求体中的环境属性不会覆盖令牌中携带的属性。
pub async fn check(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<CheckPermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut environment = req.environment;
    environment.extend(actor.environment);
    let context = AccessContext {
        user_id: actor.user_id,
        resource: req.resource,
        action: req.action,
        environment,
    };

    let result = match req.permission.as_deref() {
        Some(name) => state.authz.check_permission(&context, name).await?,
        None => state.authz.can_perform_action(&context).await?,
    };

    Ok(Json(result))
}

/// 列出用户的有效权限；查询自己无需额外权限
pub async fn user_permissions(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if user_id != actor.user_id {
        state.authz.require_permission(&actor, ROLE_READ).await?;
    }

    let permissions = state.authz.get_user_permissions(user_id).await?;

    Ok(Json(json!({
        "permissions": permissions,
        "count": permissions.len()
    })))
}

/// 为用户分配角色
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;
    req.validate()?;

    let assigned = state
        .authz
        .assign_role_to_user(&actor, user_id, &req.role_name)
        .await?;

    Ok(Json(json!({ "assigned": assigned })))
}

/// 为用户分配全部默认角色
pub async fn assign_default_roles(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let assigned = state.roles.assign_default_roles(Some(&actor), user_id).await?;

    Ok(Json(json!({ "assigned": assigned })))
}

/// 撤销用户的角色
pub async fn remove_role(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path((user_id, role_name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    state.authz.require_permission(&actor, ROLE_MANAGE).await?;

    let removed = state
        .authz
        .remove_role_from_user(&actor, user_id, &role_name)
        .await?;

    Ok(Json(json!({ "removed": removed })))
}
