//! In-memory stores
//!
//! Mirrors the Postgres implementations closely enough for the services to
//! behave identically: unique names, idempotent join rows, cascade on delete
//! and the optimistic version check on complaints.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuditStore, ComplaintStore, PermissionReader, RoleStore};
use crate::{
    error::{AppError, Result},
    models::{
        audit::{AuditLogEntry, AuditLogFilters},
        complaint::Complaint,
        role::{NewPermission, Permission, Role, UpdateRoleRequest},
    },
};

#[derive(Default)]
struct State {
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: BTreeSet<(Uuid, Uuid)>,
    user_roles: BTreeSet<(Uuid, Uuid)>,
    complaints: HashMap<Uuid, Complaint>,
    audit_logs: Vec<AuditLogEntry>,
}

/// Single-process store used by tests and local runs
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    audit_unavailable: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a database error while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Only audit writes fail while set
    pub fn set_audit_unavailable(&self, unavailable: bool) {
        self.audit_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Slow down permission lookups
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Snapshot of stored audit entries in insertion order
    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.audit_logs.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn read_delay(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl PermissionReader for InMemoryStore {
    async fn list_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>> {
        self.read_delay().await;
        self.check_available()?;
        let state = self.state.lock().await;

        let permission_ids: BTreeSet<Uuid> = state
            .user_roles
            .iter()
            .filter(|(user, _)| *user == user_id)
            .flat_map(|(_, role_id)| {
                state
                    .role_permissions
                    .iter()
                    .filter(move |(role, _)| role == role_id)
                    .map(|(_, permission_id)| *permission_id)
            })
            .collect();

        let mut permissions: Vec<Permission> = permission_ids
            .iter()
            .filter_map(|id| state.permissions.get(id).cloned())
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));

        Ok(permissions)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.roles.values().find(|r| r.name == name).cloned())
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        self.check_available()?;
        Ok(self.state.lock().await.roles.get(&id).cloned())
    }

    async fn list_default_roles(&self) -> Result<Vec<Role>> {
        let mut roles = self.list_roles().await?;
        roles.retain(|r| r.is_default);
        Ok(roles)
    }

    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_default: bool,
    ) -> Result<Role> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.roles.values().any(|r| r.name == name) {
            return Err(AppError::conflict(format!("role '{}' already exists", name)));
        }

        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_default,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, id: Uuid, changes: &UpdateRoleRequest) -> Result<Option<Role>> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if let Some(name) = &changes.name {
            if state.roles.values().any(|r| r.id != id && &r.name == name) {
                return Err(AppError::conflict("role name already exists"));
            }
        }

        let Some(role) = state.roles.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            role.name = name.clone();
        }
        if let Some(description) = &changes.description {
            role.description = Some(description.clone());
        }
        if let Some(is_default) = changes.is_default {
            role.is_default = is_default;
        }
        role.updated_at = Utc::now();

        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.roles.contains_key(&id) {
            return Ok(false);
        }
        if state.user_roles.iter().any(|(_, role)| *role == id) {
            return Err(AppError::conflict(format!("role {} is still in use", id)));
        }
        state.roles.remove(&id);
        state.role_permissions.retain(|(role, _)| *role != id);
        Ok(true)
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.lock().await.user_roles.insert((user_id, role_id)))
    }

    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.lock().await.user_roles.remove(&(user_id, role_id)))
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut permissions: Vec<Permission> = state.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| {
            (&a.resource, &a.action, &a.name).cmp(&(&b.resource, &b.action, &b.name))
        });
        Ok(permissions)
    }

    async fn find_permission_by_id(&self, id: Uuid) -> Result<Option<Permission>> {
        self.check_available()?;
        Ok(self.state.lock().await.permissions.get(&id).cloned())
    }

    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn insert_permission(&self, permission: &NewPermission) -> Result<Permission> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.permissions.values().any(|p| p.name == permission.name) {
            return Err(AppError::conflict(format!(
                "permission '{}' already exists",
                permission.name
            )));
        }

        let stored = Permission {
            id: Uuid::new_v4(),
            name: permission.name.clone(),
            resource: permission.resource.clone(),
            action: permission.action.clone(),
            description: permission.description.clone(),
            conditions: permission.conditions.clone(),
            created_at: Utc::now(),
        };
        state.permissions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_permission(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.permissions.contains_key(&id) {
            return Ok(false);
        }
        if state.role_permissions.iter().any(|(_, p)| *p == id) {
            return Err(AppError::conflict(format!("permission {} is still in use", id)));
        }
        state.permissions.remove(&id);
        Ok(true)
    }

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .role_permissions
            .insert((role_id, permission_id)))
    }

    async fn revoke_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .role_permissions
            .remove(&(role_id, permission_id)))
    }
}

#[async_trait]
impl ComplaintStore for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Complaint>> {
        self.check_available()?;
        Ok(self.state.lock().await.complaints.get(&id).cloned())
    }

    async fn insert(&self, complaint: &Complaint) -> Result<Complaint> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.complaints.contains_key(&complaint.id) {
            return Err(AppError::conflict(format!(
                "complaint {} already exists",
                complaint.id
            )));
        }
        state.complaints.insert(complaint.id, complaint.clone());
        Ok(complaint.clone())
    }

    async fn update(&self, complaint: &Complaint, expected_version: i64) -> Result<Complaint> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let stored = state
            .complaints
            .get_mut(&complaint.id)
            .ok_or_else(|| AppError::not_found(format!("complaint {}", complaint.id)))?;

        if stored.version != expected_version {
            tracing::warn!(
                complaint_id = %complaint.id,
                expected_version,
                actual_version = stored.version,
                "Stale complaint write rejected"
            );
            return Err(AppError::conflict(format!(
                "complaint {} was modified concurrently; reload and retry",
                complaint.id
            )));
        }

        let mut updated = complaint.clone();
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn insert(&self, entry: &AuditLogEntry) -> Result<()> {
        self.check_available()?;
        if self.audit_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        self.state.lock().await.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut matching: Vec<&AuditLogEntry> = state
            .audit_logs
            .iter()
            .rev()
            .filter(|entry| filters.matches(entry))
            .collect();
        // 插入顺序倒序后再按时间稳定排序
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, filters: &AuditLogFilters) -> Result<i64> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .audit_logs
            .iter()
            .filter(|entry| filters.matches(entry))
            .count() as i64)
    }
}
