//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use crate::{handlers, middleware::AppState};

/// 请求体上限
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new().route("/health", get(handlers::health::health_check));

    // 需要认证的路由
    let authenticated_routes = Router::new()
        // 权限检查
        .route("/api/v1/authz/check", post(handlers::authz::check))
        .route(
            "/api/v1/users/{id}/permissions",
            get(handlers::authz::user_permissions),
        )
        .route("/api/v1/users/{id}/roles", post(handlers::authz::assign_role))
        .route(
            "/api/v1/users/{id}/default-roles",
            post(handlers::authz::assign_default_roles),
        )
        .route(
            "/api/v1/users/{id}/roles/{role}",
            axum::routing::delete(handlers::authz::remove_role),
        )

        // 角色管理
        .route(
            "/api/v1/roles",
            get(handlers::role::list_roles).post(handlers::role::create_role),
        )
        .route(
            "/api/v1/roles/{id}",
            put(handlers::role::update_role).delete(handlers::role::delete_role),
        )
        .route(
            "/api/v1/roles/{id}/permissions/{permission_id}",
            put(handlers::role::grant_permission).delete(handlers::role::revoke_permission),
        )

        // 权限管理
        .route(
            "/api/v1/permissions",
            get(handlers::role::list_permissions).post(handlers::role::create_permission),
        )
        .route(
            "/api/v1/permissions/{id}",
            axum::routing::delete(handlers::role::delete_permission),
        )

        // 投诉工作流
        .route("/api/v1/complaints/{id}", get(handlers::complaint::get_complaint))
        .route(
            "/api/v1/complaints/{id}/history",
            get(handlers::complaint::history),
        )
        .route("/api/v1/complaints/{id}/assign", post(handlers::complaint::assign))
        .route("/api/v1/complaints/{id}/resolve", post(handlers::complaint::resolve))
        .route("/api/v1/complaints/{id}/close", post(handlers::complaint::close))
        .route("/api/v1/complaints/{id}/reopen", post(handlers::complaint::reopen))
        .route("/api/v1/complaints/{id}/escalate", post(handlers::complaint::escalate))
        .route(
            "/api/v1/complaints/{id}/status",
            post(handlers::complaint::change_status),
        )

        // 审计日志（需要审计权限）
        .route("/api/v1/audit-logs", get(handlers::audit::list_audit_logs))
        .layer(axum::middleware::from_fn_with_state(
            state.jwt_service.clone(),
            crate::auth::middleware::jwt_auth_middleware,
        ));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
