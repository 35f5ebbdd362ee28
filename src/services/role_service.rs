//! 角色与权限管理服务

use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, Result},
    models::{access::Actor, role::*},
    repository::RoleStore,
    services::audit_service::{AuditAction, AuditParams, AuditRecorder},
};

/// 管理接口所需的权限名
pub mod permissions {
    pub const ROLE_READ: &str = "role.read";
    pub const ROLE_MANAGE: &str = "role.manage";
}

pub struct RoleService {
    store: Arc<dyn RoleStore>,
    audit: Arc<AuditRecorder>,
}

impl RoleService {
    pub fn new(store: Arc<dyn RoleStore>, audit: Arc<AuditRecorder>) -> Self {
        Self { store, audit }
    }

    fn record<T: serde::Serialize>(
        &self,
        actor: &Actor,
        action: AuditAction,
        entity: &str,
        id: Uuid,
        details: &T,
    ) {
        let entity_id = id.to_string();
        self.audit.record(
            AuditParams::new(action, entity, &entity_id)
                .actor(actor.user_id)
                .meta(&actor.meta),
            details,
        );
    }

    // ==================== Roles ====================

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.store.list_roles().await
    }

    /// 创建角色（名称冲突返回 Conflict）
    #[instrument(skip(self, actor, request), fields(name = %request.name))]
    pub async fn create_role(&self, actor: &Actor, request: CreateRoleRequest) -> Result<Role> {
        request.validate()?;

        if self.store.find_role_by_name(&request.name).await?.is_some() {
            return Err(AppError::conflict(format!(
                "role '{}' already exists",
                request.name
            )));
        }

        let role = self
            .store
            .insert_role(&request.name, request.description.as_deref(), request.is_default)
            .await?;

        tracing::info!(role_id = %role.id, "Role created");
        self.record(
            actor,
            AuditAction::RoleCreate,
            "role",
            role.id,
            &json!({ "name": role.name, "is_default": role.is_default }),
        );

        Ok(role)
    }

    /// 更新角色；改名时重新检查名称冲突
    #[instrument(skip(self, actor, request))]
    pub async fn update_role(
        &self,
        actor: &Actor,
        role_id: Uuid,
        request: UpdateRoleRequest,
    ) -> Result<Role> {
        request.validate()?;

        if let Some(name) = &request.name {
            if let Some(existing) = self.store.find_role_by_name(name).await? {
                if existing.id != role_id {
                    return Err(AppError::conflict(format!("role '{}' already exists", name)));
                }
            }
        }

        let role = self
            .store
            .update_role(role_id, &request)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role {}", role_id)))?;

        self.record(
            actor,
            AuditAction::RoleUpdate,
            "role",
            role.id,
            &json!({
                "name": request.name,
                "description": request.description,
                "is_default": request.is_default,
            }),
        );

        Ok(role)
    }

    /// 删除角色；仍被用户使用时返回 Conflict
    #[instrument(skip(self, actor))]
    pub async fn delete_role(&self, actor: &Actor, role_id: Uuid) -> Result<()> {
        let role = self
            .store
            .find_role_by_id(role_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role {}", role_id)))?;

        // 占用检查由存储层在同一步完成
        if !self.store.delete_role(role_id).await.map_err(|e| match e {
            AppError::Conflict(_) => AppError::conflict(format!(
                "role '{}' is still assigned to users",
                role.name
            )),
            other => other,
        })? {
            return Err(AppError::not_found(format!("role {}", role_id)));
        }

        tracing::info!(role_id = %role_id, name = %role.name, "Role deleted");
        self.record(actor, AuditAction::RoleDelete, "role", role_id, &json!({ "name": role.name }));

        Ok(())
    }

    /// 为用户分配所有默认角色，返回实际新增的角色数
    ///
    /// 系统开通账号时 `actor` 为 None，审计记为 anonymous。
    #[instrument(skip(self, actor))]
    pub async fn assign_default_roles(
        &self,
        actor: Option<&Actor>,
        user_id: Uuid,
    ) -> Result<usize> {
        let entity_id = user_id.to_string();
        let mut assigned = 0;
        for role in self.store.list_default_roles().await? {
            if !self.store.assign_role(user_id, role.id).await? {
                continue;
            }
            assigned += 1;

            let mut params = AuditParams::new(AuditAction::UserRoleAssign, "user", &entity_id);
            if let Some(actor) = actor {
                params = params.actor(actor.user_id).meta(&actor.meta);
            }
            self.audit.record(
                params,
                &json!({ "role_id": role.id, "role_name": role.name, "default": true }),
            );
        }

        tracing::debug!(assigned, "Default roles assigned");
        Ok(assigned)
    }

    // ==================== Permissions ====================

    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.store.list_permissions().await
    }

    /// 创建权限；条件只允许标量值
    #[instrument(skip(self, actor, request), fields(name = %request.name))]
    pub async fn create_permission(
        &self,
        actor: &Actor,
        request: CreatePermissionRequest,
    ) -> Result<Permission> {
        request.validate()?;

        let conditions = request
            .conditions
            .as_ref()
            .map(parse_conditions)
            .transpose()
            .map_err(AppError::validation)?;

        if self.store.find_permission_by_name(&request.name).await?.is_some() {
            return Err(AppError::conflict(format!(
                "permission '{}' already exists",
                request.name
            )));
        }

        let permission = self
            .store
            .insert_permission(&NewPermission {
                name: request.name,
                resource: request.resource,
                action: request.action,
                description: request.description,
                conditions,
            })
            .await?;

        tracing::info!(permission_id = %permission.id, "Permission created");
        self.record(
            actor,
            AuditAction::PermissionCreate,
            "permission",
            permission.id,
            &json!({
                "name": permission.name,
                "resource": permission.resource,
                "action": permission.action,
                "conditions": permission.conditions,
            }),
        );

        Ok(permission)
    }

    /// 删除权限；仍挂在角色上时返回 Conflict
    #[instrument(skip(self, actor))]
    pub async fn delete_permission(&self, actor: &Actor, permission_id: Uuid) -> Result<()> {
        let permission = self
            .store
            .find_permission_by_id(permission_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("permission {}", permission_id)))?;

        if !self
            .store
            .delete_permission(permission_id)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::conflict(format!(
                    "permission '{}' is still attached to roles",
                    permission.name
                )),
                other => other,
            })?
        {
            return Err(AppError::not_found(format!("permission {}", permission_id)));
        }

        self.record(
            actor,
            AuditAction::PermissionDelete,
            "permission",
            permission_id,
            &json!({ "name": permission.name }),
        );

        Ok(())
    }

    // ==================== Role permissions ====================

    /// 为角色添加权限；已存在时返回 false
    #[instrument(skip(self, actor))]
    pub async fn grant_permission_to_role(
        &self,
        actor: &Actor,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool> {
        self.ensure_role_and_permission(role_id, permission_id).await?;

        let granted = self.store.grant_permission(role_id, permission_id).await?;
        if granted {
            self.record(
                actor,
                AuditAction::PermissionGrant,
                "role",
                role_id,
                &json!({ "permission_id": permission_id }),
            );
        }

        Ok(granted)
    }

    /// 从角色移除权限；未授予时返回 false
    #[instrument(skip(self, actor))]
    pub async fn revoke_permission_from_role(
        &self,
        actor: &Actor,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool> {
        self.ensure_role_and_permission(role_id, permission_id).await?;

        let revoked = self.store.revoke_permission(role_id, permission_id).await?;
        if revoked {
            self.record(
                actor,
                AuditAction::PermissionRevoke,
                "role",
                role_id,
                &json!({ "permission_id": permission_id }),
            );
        }

        Ok(revoked)
    }

    async fn ensure_role_and_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()> {
        if self.store.find_role_by_id(role_id).await?.is_none() {
            return Err(AppError::not_found(format!("role {}", role_id)));
        }
        if self.store.find_permission_by_id(permission_id).await?.is_none() {
            return Err(AppError::not_found(format!("permission {}", permission_id)));
        }
        Ok(())
    }
}
