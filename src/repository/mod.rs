//! Database repository layer
//!
//! Store traits are the seam between the services and persistence. Postgres
//! implementations back the running service; the in-memory store backs
//! tests and local development.

pub mod audit_repo;
pub mod complaint_repo;
pub mod memory;
pub mod role_repo;

pub use audit_repo::PgAuditStore;
pub use complaint_repo::PgComplaintStore;
pub use memory::InMemoryStore;
pub use role_repo::PgRoleStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    audit::{AuditLogEntry, AuditLogFilters},
    complaint::Complaint,
    role::{NewPermission, Permission, Role, UpdateRoleRequest},
};

/// Read-only permission queries (user -> role -> permission)
#[async_trait]
pub trait PermissionReader: Send + Sync {
    /// All permissions reachable through the user's role assignments.
    /// Empty for a user without roles.
    async fn list_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;
}

/// Role, permission and join-row mutations. Join writes are single atomic
/// statements so concurrent callers never create duplicate or dangling rows.
#[async_trait]
pub trait RoleStore: PermissionReader {
    // ==================== Roles ====================

    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>>;

    async fn list_default_roles(&self) -> Result<Vec<Role>>;

    /// Fails with `Conflict` when the name is taken
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_default: bool,
    ) -> Result<Role>;

    /// Fails with `Conflict` when renaming onto a taken name
    async fn update_role(&self, id: Uuid, changes: &UpdateRoleRequest) -> Result<Option<Role>>;

    /// `false` when the role does not exist; fails with `Conflict` while
    /// any user still holds it. The check and the delete are one atomic step.
    async fn delete_role(&self, id: Uuid) -> Result<bool>;

    // ==================== User roles ====================

    /// `false` when the assignment already exists
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool>;

    /// `false` when there was nothing to remove
    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool>;

    // ==================== Permissions ====================

    async fn list_permissions(&self) -> Result<Vec<Permission>>;

    async fn find_permission_by_id(&self, id: Uuid) -> Result<Option<Permission>>;

    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>>;

    /// Fails with `Conflict` when the name is taken
    async fn insert_permission(&self, permission: &NewPermission) -> Result<Permission>;

    /// `false` when the permission does not exist; fails with `Conflict`
    /// while it is still granted to a role.
    async fn delete_permission(&self, id: Uuid) -> Result<bool>;

    // ==================== Role permissions ====================

    /// `false` when the permission was already granted
    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool>;

    async fn revoke_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool>;
}

/// Complaint persistence with optimistic concurrency
#[async_trait]
pub trait ComplaintStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Complaint>>;

    async fn insert(&self, complaint: &Complaint) -> Result<Complaint>;

    /// Persist `complaint` only if the stored version still equals
    /// `expected_version`; the stored version is bumped by one. A stale
    /// write fails with `Conflict`.
    async fn update(&self, complaint: &Complaint, expected_version: i64) -> Result<Complaint>;
}

/// Append-only audit log persistence
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Newest first
    async fn query(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>>;

    async fn count(&self, filters: &AuditLogFilters) -> Result<i64>;
}

/// Map unique-constraint violations to `Conflict`, everything else stays a
/// database error.
/// RESTRICT 外键阻止删除时转为 Conflict
pub(crate) fn map_restrict_violation(e: sqlx::Error, what: &str) -> crate::error::AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_foreign_key_violation() {
            return crate::error::AppError::conflict(format!("{} is still in use", what));
        }
    }
    crate::error::AppError::Database(e)
}

pub(crate) fn map_unique_violation(e: sqlx::Error, what: &str) -> crate::error::AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return crate::error::AppError::conflict(format!("{} already exists", what));
        }
    }
    crate::error::AppError::Database(e)
}
