//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor recorded when no authenticated user exists
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Audit log entry. Append-only: never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Originating request metadata; every field is optional because
/// extraction is best effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Audit log filters
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuditLogFilters {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AuditLogFilters {
    pub fn for_entity(entity: &str, entity_id: &str) -> Self {
        Self {
            entity: Some(entity.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Default::default()
        }
    }

    /// In-memory equivalent of the SQL WHERE clause
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.user_id.as_ref().map_or(true, |v| &entry.user_id == v)
            && self.action.as_ref().map_or(true, |v| &entry.action == v)
            && self.entity.as_ref().map_or(true, |v| &entry.entity == v)
            && self.entity_id.as_ref().map_or(true, |v| &entry.entity_id == v)
            && self.start_time.map_or(true, |t| entry.created_at >= t)
            && self.end_time.map_or(true, |t| entry.created_at <= t)
    }
}

/// Audit log query (HTTP)
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    /// Split into filters and a clamped (limit, offset) pair
    pub fn into_parts(self) -> (AuditLogFilters, i64, i64) {
        let limit = self
            .limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        let filters = AuditLogFilters {
            user_id: self.user_id,
            action: self.action,
            entity: self.entity,
            entity_id: self.entity_id,
            start_time: self.start_time,
            end_time: self.end_time,
        };
        (filters, limit, offset)
    }
}

/// Audit log page
#[derive(Debug, Serialize)]
pub struct AuditLogPage {
    pub items: Vec<AuditLogEntry>,
    pub total: i64,
}
