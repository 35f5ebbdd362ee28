//! 权限检查服务
//!
//! RBAC + ABAC：用户经角色获得权限，权限可带属性条件。拒绝是返回值而非
//! 错误；存储故障以 Infrastructure 错误向上传播，超时按拒绝处理。

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::AuthorizationConfig,
    error::{AppError, Result},
    models::{
        access::{AccessContext, Actor, PermissionCheck},
        role::Permission,
    },
    repository::RoleStore,
    services::{
        audit_service::{AuditAction, AuditParams, AuditRecorder},
        conditions::conditions_match,
    },
};

pub const TIMED_OUT_REASON: &str = "authorization check timed out";

pub struct AuthorizationService {
    store: Arc<dyn RoleStore>,
    audit: Arc<AuditRecorder>,
    config: AuthorizationConfig,
}

impl AuthorizationService {
    pub fn new(
        store: Arc<dyn RoleStore>,
        audit: Arc<AuditRecorder>,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// 获取用户经由角色获得的全部权限（无角色时为空列表）
    #[instrument(skip(self))]
    pub async fn get_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>> {
        tokio::time::timeout(
            self.config.check_timeout(),
            self.store.list_user_permissions(user_id),
        )
        .await
        .map_err(|_| AppError::timeout("permission lookup timed out"))?
    }

    /// 检查用户是否拥有指定名称的权限
    #[instrument(skip(self, context), fields(user_id = %context.user_id))]
    pub async fn check_permission(
        &self,
        context: &AccessContext,
        permission_name: &str,
    ) -> Result<PermissionCheck> {
        self.evaluate(context, |permissions| {
            let mut named = permissions.iter().filter(|p| p.name == permission_name).peekable();
            if named.peek().is_none() {
                return PermissionCheck::deny(format!(
                    "missing permission '{}'",
                    permission_name
                ));
            }
            if named.any(|p| conditions_match(p.conditions.as_ref(), &context.environment)) {
                PermissionCheck::allow()
            } else {
                PermissionCheck::deny(format!(
                    "conditions for permission '{}' are not satisfied",
                    permission_name
                ))
            }
        })
        .await
    }

    /// 检查用户能否对资源执行操作；任一匹配的权限即可
    #[instrument(skip(self, context), fields(user_id = %context.user_id))]
    pub async fn can_perform_action(&self, context: &AccessContext) -> Result<PermissionCheck> {
        let (Some(resource), Some(action)) = (context.resource.as_deref(), context.action.as_deref())
        else {
            return Err(AppError::validation(
                "resource and action are required for an action check",
            ));
        };

        self.evaluate(context, |permissions| {
            let mut candidates = permissions
                .iter()
                .filter(|p| p.resource == resource && p.action == action)
                .peekable();
            if candidates.peek().is_none() {
                return PermissionCheck::deny(format!(
                    "no permission grants '{}' on '{}'",
                    action, resource
                ));
            }
            if candidates.any(|p| conditions_match(p.conditions.as_ref(), &context.environment)) {
                PermissionCheck::allow()
            } else {
                PermissionCheck::deny(format!(
                    "conditions for '{}' on '{}' are not satisfied",
                    action, resource
                ))
            }
        })
        .await
    }

    /// 检查权限，如果无权限则返回 Forbidden 错误
    pub async fn require_permission(&self, actor: &Actor, permission_name: &str) -> Result<()> {
        let context = AccessContext::new(actor.user_id).with_environment(actor.environment.clone());
        let check = self.check_permission(&context, permission_name).await?;

        if check.allowed {
            return Ok(());
        }

        let reason = check
            .reason
            .unwrap_or_else(|| format!("missing permission '{}'", permission_name));
        tracing::warn!(
            user_id = %actor.user_id,
            permission = %permission_name,
            reason = %reason,
            "Permission denied"
        );

        if self.config.audit_denials {
            let user_id = actor.user_id.to_string();
            self.audit.record(
                AuditParams::new(AuditAction::AuthorizationDenied, "permission", permission_name)
                    .actor(actor.user_id)
                    .meta(&actor.meta),
                &json!({ "permission": permission_name, "reason": reason, "user_id": user_id }),
            );
        }

        Err(AppError::forbidden(reason))
    }

    /// 为用户分配角色；角色不存在或已分配时返回 false
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn assign_role_to_user(
        &self,
        actor: &Actor,
        user_id: Uuid,
        role_name: &str,
    ) -> Result<bool> {
        let Some(role) = self.store.find_role_by_name(role_name).await? else {
            tracing::debug!(role = %role_name, "Role not found; nothing assigned");
            return Ok(false);
        };

        let assigned = self.store.assign_role(user_id, role.id).await?;
        if assigned {
            tracing::info!(user_id = %user_id, role = %role.name, "Role assigned");
            let entity_id = user_id.to_string();
            self.audit.record(
                AuditParams::new(AuditAction::UserRoleAssign, "user", &entity_id)
                    .actor(actor.user_id)
                    .meta(&actor.meta),
                &json!({ "role_id": role.id, "role_name": role.name }),
            );
        }

        Ok(assigned)
    }

    /// 撤销用户的角色；没有可撤销的分配时返回 false
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn remove_role_from_user(
        &self,
        actor: &Actor,
        user_id: Uuid,
        role_name: &str,
    ) -> Result<bool> {
        let Some(role) = self.store.find_role_by_name(role_name).await? else {
            return Ok(false);
        };

        let removed = self.store.remove_role(user_id, role.id).await?;
        if removed {
            tracing::info!(user_id = %user_id, role = %role.name, "Role removed");
            let entity_id = user_id.to_string();
            self.audit.record(
                AuditParams::new(AuditAction::UserRoleRemove, "user", &entity_id)
                    .actor(actor.user_id)
                    .meta(&actor.meta),
                &json!({ "role_id": role.id, "role_name": role.name }),
            );
        }

        Ok(removed)
    }

    /// 加载权限并求值；超时按拒绝处理
    async fn evaluate<F>(&self, context: &AccessContext, decide: F) -> Result<PermissionCheck>
    where
        F: FnOnce(&[Permission]) -> PermissionCheck,
    {
        let lookup = self.store.list_user_permissions(context.user_id);
        let check = match with_timeout(self.config.check_timeout(), lookup).await {
            Some(permissions) => decide(&permissions?),
            None => {
                tracing::warn!(user_id = %context.user_id, "Authorization check timed out");
                metrics::counter!("authz.checks", "outcome" => "timeout").increment(1);
                return Ok(PermissionCheck::deny(TIMED_OUT_REASON));
            }
        };

        let outcome = if check.allowed { "allowed" } else { "denied" };
        metrics::counter!("authz.checks", "outcome" => outcome).increment(1);
        tracing::debug!(outcome, reason = ?check.reason, "Authorization evaluated");

        Ok(check)
    }
}

async fn with_timeout<F: Future>(duration: std::time::Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(duration, fut).await.ok()
}
