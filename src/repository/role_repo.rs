//! Role repository (角色与权限数据访问)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::{map_restrict_violation, map_unique_violation, PermissionReader, RoleStore};
use crate::{
    error::{AppError, Result},
    models::role::*,
};

/// Row shape of the permissions table; conditions live in a JSONB column
#[derive(sqlx::FromRow)]
struct PermissionRow {
    id: Uuid,
    name: String,
    resource: String,
    action: String,
    description: Option<String>,
    conditions: Option<Json<Conditions>>,
    created_at: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: row.id,
            name: row.name,
            resource: row.resource,
            action: row.action,
            description: row.description,
            conditions: row.conditions.map(|c| c.0),
            created_at: row.created_at,
        }
    }
}

const PERMISSION_COLUMNS: &str =
    "p.id, p.name, p.resource, p.action, p.description, p.conditions, p.created_at";

pub struct PgRoleStore {
    db: PgPool,
}

impl PgRoleStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PermissionReader for PgRoleStore {
    /// 获取用户经由角色获得的全部权限
    async fn list_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            r#"
            SELECT DISTINCT {PERMISSION_COLUMNS}
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            ORDER BY p.name, p.created_at
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    /// 根据名称查找角色
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;

        Ok(role)
    }
}

#[async_trait]
impl RoleStore for PgRoleStore {
    // ==================== Roles ====================

    /// 列出所有角色
    async fn list_roles(&self) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.db)
            .await?;

        Ok(roles)
    }

    /// 根据 ID 查找角色
    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(role)
    }

    async fn list_default_roles(&self) -> Result<Vec<Role>> {
        let roles =
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE is_default ORDER BY name")
                .fetch_all(&self.db)
                .await?;

        Ok(roles)
    }

    /// 创建角色
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_default: bool,
    ) -> Result<Role> {
        sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (id, name, description, is_default)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(is_default)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, &format!("role '{}'", name)))
    }

    /// 更新角色
    async fn update_role(&self, id: Uuid, changes: &UpdateRoleRequest) -> Result<Option<Role>> {
        sqlx::query_as::<_, Role>(
            r#"
            UPDATE roles
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_default = COALESCE($4, is_default),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.description)
        .bind(changes.is_default)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, "role name"))
    }

    /// 删除角色
    /// user_roles 上的 RESTRICT 外键保证删除与占用检查原子完成
    async fn delete_role(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| map_restrict_violation(e, &format!("role {}", id)))?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== User roles ====================

    /// 为用户分配角色，重复分配不报错
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&self.db)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AppError::not_found(format!("user {}", user_id))
            }
            _ => AppError::Database(e),
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// 撤销用户的角色
    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Permissions ====================

    /// 列出所有权限
    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p ORDER BY p.resource, p.action, p.name"
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn find_permission_by_id(&self, id: Uuid) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Permission::from))
    }

    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Permission::from))
    }

    /// 创建权限
    async fn insert_permission(&self, permission: &NewPermission) -> Result<Permission> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            INSERT INTO permissions (id, name, resource, action, description, conditions)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, resource, action, description, conditions, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(permission.conditions.clone().map(Json))
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, &format!("permission '{}'", permission.name)))?;

        Ok(row.into())
    }

    async fn delete_permission(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| map_restrict_violation(e, &format!("permission {}", id)))?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Role permissions ====================

    /// 为角色添加权限
    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 从角色移除权限
    async fn revoke_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.db)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
